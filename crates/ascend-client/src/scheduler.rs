//! Sync Scheduler
//!
//! Decides when an exchange runs. Triggers arrive from mount, a heartbeat
//! timer, focus regain, local mutations and manual requests. At most one
//! exchange is in flight per client; triggers that arrive while one is
//! running are coalesced into it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::identity::IdentityProvider;
use crate::protocol::{run_exchange, ExchangeSummary};
use crate::store::LocalStore;
use crate::transport::SyncTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Idle => "idle",
            SyncState::Syncing => "syncing",
            SyncState::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable scheduler status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    /// Only advances on a completed exchange
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            last_synced_at: None,
            last_error: None,
        }
    }
}

/// What asked for an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Mount,
    Heartbeat,
    FocusRegained,
    Mutation,
    Manual,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Mount => "mount",
            SyncTrigger::Heartbeat => "heartbeat",
            SyncTrigger::FocusRegained => "focus_regained",
            SyncTrigger::Mutation => "mutation",
            SyncTrigger::Manual => "manual",
        }
    }
}

/// Result of asking for an exchange inline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(ExchangeSummary),
    /// Another exchange was already in flight
    Coalesced,
    Failed(SyncError),
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between background exchanges
    pub heartbeat: Duration,
    /// Upper bound on a single exchange
    pub exchange_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(60),
            exchange_timeout: Duration::from_secs(15),
        }
    }
}

struct Inner {
    store: LocalStore,
    transport: Arc<dyn SyncTransport>,
    identity: Arc<dyn IdentityProvider>,
    config: SchedulerConfig,
    in_flight: AtomicBool,
    status: watch::Sender<SyncStatus>,
    idle: Notify,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self
            .heartbeat
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

/// Releases the in-flight claim on every exit path, including panics and
/// cancellation.
struct InFlightGuard<'a> {
    inner: &'a Inner,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.inner.in_flight.store(false, Ordering::Release);
        self.inner.idle.notify_waiters();
    }
}

impl Inner {
    fn try_claim(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Run one exchange. The caller must hold the in-flight claim.
    async fn run_claimed(&self, trigger: SyncTrigger) -> RunOutcome {
        let _guard = InFlightGuard { inner: self };

        self.status.send_modify(|s| s.state = SyncState::Syncing);
        debug!(trigger = trigger.as_str(), identity = %self.store.identity_id(), "Exchange started");

        let timeout = self.config.exchange_timeout;
        let result = match tokio::time::timeout(
            timeout,
            run_exchange(&self.store, self.transport.as_ref(), self.identity.as_ref()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SyncError::Transport(format!(
                "Exchange timed out after {:?}",
                timeout
            ))),
        };

        match result {
            Ok(summary) => {
                self.status.send_modify(|s| {
                    s.state = SyncState::Idle;
                    s.last_synced_at = Some(Utc::now());
                    s.last_error = None;
                });
                info!(
                    trigger = trigger.as_str(),
                    sent = summary.sent,
                    received = summary.received,
                    level = summary.level,
                    "Sync completed"
                );
                RunOutcome::Completed(summary)
            }
            Err(err) => {
                if matches!(err, SyncError::Auth(_)) {
                    self.identity.invalidate();
                }
                self.status.send_modify(|s| {
                    s.state = SyncState::Error;
                    s.last_error = Some(err.to_string());
                });
                warn!(
                    trigger = trigger.as_str(),
                    kind = err.kind(),
                    error = %err,
                    "Sync failed, local store unchanged"
                );
                RunOutcome::Failed(err)
            }
        }
    }
}

/// Per-client exchange scheduler. Cheap to clone.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    pub fn new(
        store: LocalStore,
        transport: Arc<dyn SyncTransport>,
        identity: Arc<dyn IdentityProvider>,
        config: SchedulerConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                identity,
                config,
                in_flight: AtomicBool::new(false),
                status,
                idle: Notify::new(),
                heartbeat: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn identity_id(&self) -> &str {
        self.inner.store.identity_id()
    }

    /// Fire-and-forget trigger. Returns `false` when the trigger was coalesced
    /// into an exchange that is already running.
    pub fn request_sync(&self, trigger: SyncTrigger) -> bool {
        if !self.inner.try_claim() {
            debug!(trigger = trigger.as_str(), "Exchange in flight, trigger coalesced");
            return false;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                // Give the claim back; nothing will run it
                self.inner.in_flight.store(false, Ordering::Release);
                self.inner.idle.notify_waiters();
                warn!(trigger = trigger.as_str(), error = %e, "No runtime available for sync");
                return false;
            }
        };

        let inner = self.inner.clone();
        handle.spawn(async move {
            inner.run_claimed(trigger).await;
        });
        true
    }

    /// Run one exchange inline and report how it went.
    pub async fn sync_now(&self, trigger: SyncTrigger) -> RunOutcome {
        if !self.inner.try_claim() {
            debug!(trigger = trigger.as_str(), "Exchange in flight, trigger coalesced");
            return RunOutcome::Coalesced;
        }
        self.inner.run_claimed(trigger).await
    }

    pub fn status(&self) -> SyncStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Wait until no exchange is in flight.
    pub async fn settle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_in_flight() {
                return;
            }
            notified.await;
        }
    }

    /// Start the heartbeat and run the initial exchange.
    pub fn mount(&self) {
        self.spawn_heartbeat();
        self.request_sync(SyncTrigger::Mount);
    }

    /// Start the background heartbeat. Replaces any running heartbeat.
    ///
    /// Returns `false` without starting anything when called outside a
    /// Tokio runtime.
    pub fn spawn_heartbeat(&self) -> bool {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "No runtime available, heartbeat not started");
                return false;
            }
        };
        let period = self.inner.config.heartbeat;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; mount covers it
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SyncScheduler { inner }.request_sync(SyncTrigger::Heartbeat);
            }
        });

        let previous = self
            .inner
            .heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(period_secs = period.as_secs(), "Heartbeat started");
        true
    }

    /// Stop the background heartbeat, if running.
    pub fn stop_heartbeat(&self) {
        let handle = self
            .inner
            .heartbeat
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("Heartbeat stopped");
        }
    }
}
