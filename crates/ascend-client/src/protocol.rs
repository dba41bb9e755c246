//! Reconciliation Protocol (client side)
//!
//! One exchange cycle:
//! 1. Collect every local collection, dropping records the remote store would
//!    refuse (weekday labels, out-of-range ratings, non-finite trade figures)
//! 2. Transmit the payload plus the local XP counter
//! 3. Validate the remote store's resolved state
//! 4. Write it back into the local store in one atomic batch
//!
//! Any failure before step 4 leaves the local store exactly as it was.

use ascend_types::{Record, SyncRequest, MAX_XP_TOTAL};
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::identity::IdentityProvider;
use crate::store::{LocalStore, ReconcileSummary};
use crate::transport::SyncTransport;

/// Outcome of a completed exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSummary {
    /// Records transmitted
    pub sent: usize,
    /// Records in the server's resolved state
    pub received: usize,
    pub level: u32,
    pub reconcile: ReconcileSummary,
}

/// Build the request for one exchange from the local snapshot.
pub fn collect(store: &LocalStore) -> Result<SyncRequest> {
    let request = SyncRequest {
        identity_id: store.identity_id().to_string(),
        habit_completions: transmittable(store.read()?),
        journal_entries: transmittable(store.read()?),
        focus_sessions: transmittable(store.read()?),
        trades: transmittable(store.read()?),
        xp_total: store.xp()?.min(MAX_XP_TOTAL),
    };
    debug!(
        identity = %request.identity_id,
        records = request.record_count(),
        xp_total = request.xp_total,
        "Collected local snapshot"
    );
    Ok(request)
}

fn transmittable<R: Record>(records: Vec<R>) -> Vec<R> {
    records.into_iter().filter(|r| r.is_transmittable()).collect()
}

/// Run one full exchange against the remote store.
pub async fn run_exchange(
    store: &LocalStore,
    transport: &dyn SyncTransport,
    identity: &dyn IdentityProvider,
) -> Result<ExchangeSummary> {
    let token = identity
        .token()
        .ok_or_else(|| SyncError::Auth("No cached identity token".to_string()))?;

    let request = collect(store)?;
    let response = transport.exchange(&token, &request).await?;
    response.validate()?;

    let received = response.habit_completions.len()
        + response.journal_entries.len()
        + response.focus_sessions.len()
        + response.trades.len();

    let reconcile = store.reconcile(&request, &response)?;

    info!(
        identity = %request.identity_id,
        sent = request.record_count(),
        received,
        xp_total = reconcile.xp_total,
        level = response.level,
        "Exchange reconciled"
    );

    Ok(ExchangeSummary {
        sent: request.record_count(),
        received,
        level: response.level,
        reconcile,
    })
}
