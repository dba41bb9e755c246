//! XP to level resolution
//!
//! Advancing from level `L` to `L + 1` costs `L * XP_UNIT` points. Client
//! display and server responses both go through [`resolve`] so a total always
//! maps to the same level everywhere.

use serde::{Deserialize, Serialize};

/// Points needed to leave level 1
pub const XP_UNIT: u64 = 500;

/// Largest XP total either side accepts; the remote store keeps XP in a
/// signed 64-bit column.
pub const MAX_XP_TOTAL: u64 = i64::MAX as u64;

/// Position of a point total on the level ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub level: u32,
    /// Points earned since reaching `level`
    pub points_into_level: u64,
    /// Points still missing before `level + 1`
    pub points_to_next_level: u64,
}

/// Resolve a cumulative total with the standard unit.
pub fn resolve(total_points: u64) -> LevelProgress {
    resolve_with_unit(total_points, XP_UNIT)
}

/// Resolve a cumulative total against a custom unit (a zero unit counts as 1).
///
/// Reaching level `L` from zero costs `unit * L * (L - 1) / 2`, so the level
/// is found from the quadratic root and then corrected for float rounding.
/// Levels past `u32::MAX` saturate.
pub fn resolve_with_unit(total_points: u64, unit: u64) -> LevelProgress {
    let unit = u128::from(unit.max(1));
    let total = u128::from(total_points);
    let reached = |level: u128| unit * level * (level - 1) / 2;

    let estimate = (1.0 + (1.0 + 8.0 * total_points as f64 / unit as f64).sqrt()) / 2.0;
    let mut level = (estimate as u128).clamp(1, u128::from(u32::MAX));
    while level > 1 && reached(level) > total {
        level -= 1;
    }
    while level < u128::from(u32::MAX) && reached(level + 1) <= total {
        level += 1;
    }

    let into = total - reached(level);
    let to_next = (level * unit).saturating_sub(into);
    LevelProgress {
        level: level as u32,
        points_into_level: u64::try_from(into).unwrap_or(u64::MAX),
        points_to_next_level: u64::try_from(to_next).unwrap_or(u64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_points_is_level_one() {
        assert_eq!(
            resolve(0),
            LevelProgress {
                level: 1,
                points_into_level: 0,
                points_to_next_level: 500
            }
        );
    }

    #[test]
    fn test_exact_threshold_advances() {
        let progress = resolve(500);
        assert_eq!(progress.level, 2);
        assert_eq!(progress.points_into_level, 0);
        assert_eq!(progress.points_to_next_level, 1000);
    }

    #[test]
    fn test_thresholds_grow_linearly() {
        // 500 for L1, 1000 for L2, 1500 for L3
        assert_eq!(resolve(499).level, 1);
        assert_eq!(resolve(1499), LevelProgress { level: 2, points_into_level: 999, points_to_next_level: 1 });
        assert_eq!(resolve(1500).level, 3);
        assert_eq!(resolve(3000).level, 4);
        assert_eq!(resolve(2999).points_to_next_level, 1);
    }

    #[test]
    fn test_deterministic() {
        for p in [0, 1, 120, 200, 499, 500, 12_345, 1_000_000] {
            assert_eq!(resolve(p), resolve(p));
        }
    }

    #[test]
    fn test_custom_unit() {
        assert_eq!(resolve_with_unit(30, 10).level, 3);
        assert_eq!(resolve_with_unit(30, 10).points_into_level, 0);
        // Zero unit must not loop forever
        assert!(resolve_with_unit(10, 0).level > 1);
    }

    #[test]
    fn test_large_totals_terminate() {
        let progress = resolve(250_000_000);
        assert!(progress.level > 1);
        assert!(progress.points_into_level < u64::from(progress.level) * XP_UNIT);
    }

    /// Walks the ladder one level at a time.
    fn stepwise(total: u64, unit: u64) -> LevelProgress {
        let mut level = 1u32;
        let mut remaining = total;
        loop {
            let threshold = u64::from(level) * unit;
            if remaining < threshold {
                return LevelProgress {
                    level,
                    points_into_level: remaining,
                    points_to_next_level: threshold - remaining,
                };
            }
            remaining -= threshold;
            level += 1;
        }
    }

    #[test]
    fn test_matches_stepwise_ladder() {
        for unit in [1, 7, XP_UNIT] {
            for total in 0..20_000 {
                assert_eq!(resolve_with_unit(total, unit), stepwise(total, unit), "total {total} unit {unit}");
            }
        }
    }

    #[test]
    fn test_cap_resolves_consistently() {
        let progress = resolve(MAX_XP_TOTAL);
        let level = u128::from(progress.level);
        let reached = u128::from(XP_UNIT) * level * (level - 1) / 2;
        assert_eq!(reached + u128::from(progress.points_into_level), u128::from(MAX_XP_TOTAL));
        assert!(progress.points_into_level < u64::from(progress.level) * XP_UNIT);
        assert!(progress.points_to_next_level > 0);

        // Unit 1 pushes the level past u32::MAX
        assert_eq!(resolve_with_unit(u64::MAX, 1).level, u32::MAX);
    }
}
