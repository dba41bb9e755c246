//! Boundary operations exposed to the rest of the application.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::scheduler::{SyncScheduler, SyncState, SyncTrigger};

/// Status as shown to feature code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusView {
    pub state: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// One scheduler per signed-in identity
#[derive(Clone, Default)]
pub struct SyncService {
    schedulers: Arc<DashMap<String, SyncScheduler>>,
}

impl SyncService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the scheduler for its identity.
    ///
    /// A scheduler already registered for the same identity is stopped and
    /// its in-flight exchange, if any, finishes before the new one takes over.
    pub async fn register(&self, scheduler: SyncScheduler) {
        let identity = scheduler.identity_id().to_string();
        if let Some(previous) = self.unregister(&identity) {
            previous.settle().await;
        }
        self.schedulers.insert(identity.clone(), scheduler);
        info!(identity = %identity, "Scheduler registered");
    }

    pub fn unregister(&self, identity_id: &str) -> Option<SyncScheduler> {
        let (_, scheduler) = self.schedulers.remove(identity_id)?;
        scheduler.stop_heartbeat();
        info!(identity = %identity_id, "Scheduler unregistered");
        Some(scheduler)
    }

    pub fn scheduler(&self, identity_id: &str) -> Option<SyncScheduler> {
        self.schedulers.get(identity_id).map(|s| s.value().clone())
    }

    /// Ask for an exchange. Never blocks and never fails; unknown identities
    /// are ignored.
    pub fn request_sync(&self, identity_id: &str) {
        self.signal(identity_id, SyncTrigger::Manual);
    }

    /// Deliver a lifecycle trigger such as focus regain.
    pub fn signal(&self, identity_id: &str, trigger: SyncTrigger) {
        match self.scheduler(identity_id) {
            Some(scheduler) => {
                scheduler.request_sync(trigger);
            }
            None => debug!(
                identity = %identity_id,
                trigger = trigger.as_str(),
                "No scheduler for identity, trigger dropped"
            ),
        }
    }

    pub fn get_sync_status(&self, identity_id: &str) -> SyncStatusView {
        match self.scheduler(identity_id) {
            Some(scheduler) => {
                let status = scheduler.status();
                SyncStatusView {
                    state: status.state,
                    last_synced_at: status.last_synced_at,
                }
            }
            None => SyncStatusView {
                state: SyncState::Idle,
                last_synced_at: None,
            },
        }
    }
}
