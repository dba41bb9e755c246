//! Local Mutation Store
//!
//! Client-side snapshot of every tracked collection, namespaced by identity.
//!
//! ## Layout
//!
//! ```text
//! <identity>:habits    JSON array of HabitCompletion
//! <identity>:journal   JSON array of JournalEntry
//! <identity>:focus     JSON array of FocusSession
//! <identity>:trades    JSON array of Trade
//! <identity>:xp        XP counter
//! ```
//!
//! The store is single-writer per client. Writes are visible to the next read
//! immediately. An internal lock serializes read-modify-write cycles so a
//! reconcile never races a user mutation.

pub mod backend;

pub use backend::{KvBackend, MemoryBackend, SledBackend, SledConfig};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ascend_types::{
    resolve, EntityKind, FocusSession, HabitCompletion, JournalEntry, LevelProgress, Record,
    SyncRequest, SyncResponse, Trade, MAX_XP_TOTAL,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Every local collection at one point in time
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalSnapshot {
    pub habit_completions: Vec<HabitCompletion>,
    pub journal_entries: Vec<JournalEntry>,
    pub focus_sessions: Vec<FocusSession>,
    pub trades: Vec<Trade>,
    pub xp_total: u64,
}

/// What a reconcile changed locally
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Keyed records whose value now comes from the server
    pub keyed_updates: usize,
    /// Keyed records kept because they changed while the exchange was in flight
    pub kept_local: usize,
    /// Append-only kinds filled from the server on first sync
    pub bootstrapped: Vec<EntityKind>,
    pub xp_total: u64,
}

/// Namespaced handle over a [`KvBackend`]
#[derive(Clone)]
pub struct LocalStore {
    backend: Arc<dyn KvBackend>,
    namespace: String,
    write_lock: Arc<Mutex<()>>,
}

impl LocalStore {
    pub fn new(backend: Arc<dyn KvBackend>, identity_id: impl Into<String>) -> Self {
        Self {
            backend,
            namespace: identity_id.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store backed by a fresh [`MemoryBackend`]
    pub fn in_memory(identity_id: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), identity_id)
    }

    pub fn identity_id(&self) -> &str {
        &self.namespace
    }

    fn kind_key(&self, kind: EntityKind) -> String {
        format!("{}:{}", self.namespace, kind.as_str())
    }

    fn xp_key(&self) -> String {
        format!("{}:xp", self.namespace)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|e| SyncError::Store(format!("Lock poisoned: {}", e)))
    }

    /// Current snapshot of one collection
    pub fn read<R: Record>(&self) -> Result<Vec<R>> {
        match self.backend.get(&self.kind_key(R::KIND))? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                SyncError::Store(format!("Corrupt {} collection: {}", R::KIND, e))
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Replace one collection wholesale
    pub fn write<R: Record>(&self, records: &[R]) -> Result<()> {
        records.iter().try_for_each(check)?;
        let _guard = self.lock()?;
        self.backend
            .apply_batch(vec![(self.kind_key(R::KIND), encode(records)?)])
    }

    /// Upsert a single record into its collection by natural key
    pub fn apply_local_change<R: Record>(&self, record: R) -> Result<()> {
        check(&record)?;
        let _guard = self.lock()?;
        let mut records = self.read::<R>()?;
        let key = record.key();
        match records.iter_mut().find(|r| r.key() == key) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        debug!(kind = %R::KIND, key = ?key, "Local change applied");
        self.backend
            .apply_batch(vec![(self.kind_key(R::KIND), encode(&records)?)])
    }

    /// Remove a record from the local working set.
    ///
    /// The removal is never transmitted; the remote copy is untouched.
    pub fn remove<R: Record>(&self, key: &R::Key) -> Result<bool> {
        let _guard = self.lock()?;
        let mut records = self.read::<R>()?;
        let before = records.len();
        records.retain(|r| &r.key() != key);
        if records.len() == before {
            return Ok(false);
        }
        self.backend
            .apply_batch(vec![(self.kind_key(R::KIND), encode(&records)?)])?;
        Ok(true)
    }

    pub fn xp(&self) -> Result<u64> {
        match self.backend.get(&self.xp_key())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SyncError::Store(format!("Corrupt XP counter: {}", e))),
            None => Ok(0),
        }
    }

    /// Totals above [`MAX_XP_TOTAL`] are stored as the maximum.
    pub fn set_xp(&self, total: u64) -> Result<()> {
        let _guard = self.lock()?;
        let total = total.min(MAX_XP_TOTAL);
        self.backend.apply_batch(vec![(self.xp_key(), encode(&total)?)])
    }

    /// Add points locally. The new total is only a proposal until the remote
    /// store echoes it back, and saturates at [`MAX_XP_TOTAL`].
    pub fn propose_xp(&self, points: u64) -> Result<u64> {
        let _guard = self.lock()?;
        let total = self.xp()?.saturating_add(points).min(MAX_XP_TOTAL);
        self.backend.apply_batch(vec![(self.xp_key(), encode(&total)?)])?;
        Ok(total)
    }

    /// Level for the locally mirrored XP total
    pub fn level(&self) -> Result<LevelProgress> {
        Ok(resolve(self.xp()?))
    }

    pub fn snapshot(&self) -> Result<LocalSnapshot> {
        Ok(LocalSnapshot {
            habit_completions: self.read()?,
            journal_entries: self.read()?,
            focus_sessions: self.read()?,
            trades: self.read()?,
            xp_total: self.xp()?,
        })
    }

    /// Raw persisted bytes for this identity
    pub fn raw_entries(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        self.backend.dump(&format!("{}:", self.namespace))
    }

    /// Write a resolved server state back in one atomic batch.
    ///
    /// `sent` is the request the response answers. Keyed records take the
    /// server's value unless the local record changed after `sent` was
    /// collected. Append-only kinds are only filled when the local collection
    /// is empty.
    pub fn reconcile(&self, sent: &SyncRequest, response: &SyncResponse) -> Result<ReconcileSummary> {
        let _guard = self.lock()?;
        let mut summary = ReconcileSummary::default();
        let mut writes = Vec::with_capacity(5);

        let habits = merge_keyed(
            self.read::<HabitCompletion>()?,
            &sent.habit_completions,
            &response.habit_completions,
            &mut summary,
        );
        writes.push((self.kind_key(EntityKind::Habits), encode(&habits)?));

        let journal = merge_keyed(
            self.read::<JournalEntry>()?,
            &sent.journal_entries,
            &response.journal_entries,
            &mut summary,
        );
        writes.push((self.kind_key(EntityKind::Journal), encode(&journal)?));

        if let Some(focus) = bootstrap(self.read::<FocusSession>()?, &response.focus_sessions) {
            summary.bootstrapped.push(EntityKind::Focus);
            writes.push((self.kind_key(EntityKind::Focus), encode(&focus)?));
        }
        if let Some(trades) = bootstrap(self.read::<Trade>()?, &response.trades) {
            summary.bootstrapped.push(EntityKind::Trades);
            writes.push((self.kind_key(EntityKind::Trades), encode(&trades)?));
        }

        // A proposal made while the exchange was in flight is kept until the
        // next exchange carries it; otherwise the server value replaces ours.
        let local_xp = self.xp()?;
        let xp_total = if local_xp != sent.xp_total {
            response.xp_total.max(local_xp)
        } else {
            response.xp_total
        };
        writes.push((self.xp_key(), encode(&xp_total)?));
        summary.xp_total = xp_total;

        self.backend.apply_batch(writes)?;
        Ok(summary)
    }
}

fn check<R: Record>(record: &R) -> Result<()> {
    record
        .check()
        .map_err(|e| SyncError::InvalidRecord(e.to_string()))
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| SyncError::Store(format!("Encode failed: {}", e)))
}

fn merge_keyed<R: Record + PartialEq>(
    local: Vec<R>,
    sent: &[R],
    server: &[R],
    summary: &mut ReconcileSummary,
) -> Vec<R> {
    let sent: BTreeMap<R::Key, &R> = sent.iter().map(|r| (r.key(), r)).collect();
    let mut merged: BTreeMap<R::Key, R> = local.into_iter().map(|r| (r.key(), r)).collect();

    for incoming in server {
        let key = incoming.key();
        let edited_in_flight = match merged.get(&key) {
            Some(current) => sent.get(&key).map_or(true, |s| *s != current),
            None => false,
        };
        if edited_in_flight {
            summary.kept_local += 1;
            continue;
        }
        if merged.get(&key) != Some(incoming) {
            summary.keyed_updates += 1;
        }
        merged.insert(key, incoming.clone());
    }

    merged.into_values().collect()
}

fn bootstrap<R: Record>(local: Vec<R>, server: &[R]) -> Option<Vec<R>> {
    if local.is_empty() && !server.is_empty() {
        Some(server.to_vec())
    } else {
        None
    }
}
