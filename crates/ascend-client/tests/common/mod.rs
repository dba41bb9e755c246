//! Shared fixtures for client integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ascend_client::{
    CachedIdentity, LocalStore, Result, SchedulerConfig, SyncError, SyncScheduler, SyncTransport,
};
use ascend_types::{resolve, HabitCompletion, SyncRequest, SyncResponse};
use async_trait::async_trait;
use tokio::sync::Semaphore;

type Handler = Box<dyn Fn(&SyncRequest) -> Result<SyncResponse> + Send + Sync>;

/// Scriptable transport that records every request it receives.
pub struct MockTransport {
    handler: Handler,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<SyncRequest>>,
}

impl MockTransport {
    pub fn new(handler: impl Fn(&SyncRequest) -> Result<SyncResponse> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            gate: None,
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Echo the request back, with the server holding `server_xp`.
    pub fn echo(server_xp: u64) -> Self {
        Self::new(move |req| Ok(echo_response(req, server_xp)))
    }

    pub fn failing(err: SyncError) -> Self {
        Self::new(move |_| Err(err.clone()))
    }

    /// Hold every exchange until the gate is given a permit.
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn exchange(&self, _token: &str, request: &SyncRequest) -> Result<SyncResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| SyncError::Transport(e.to_string()))?
                .forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(request)
    }
}

pub fn echo_response(request: &SyncRequest, server_xp: u64) -> SyncResponse {
    let xp_total = server_xp.max(request.xp_total);
    SyncResponse {
        xp_total,
        level: resolve(xp_total).level,
        habit_completions: request.habit_completions.clone(),
        journal_entries: request.journal_entries.clone(),
        focus_sessions: request.focus_sessions.clone(),
        trades: request.trades.clone(),
    }
}

pub fn empty_response(xp_total: u64) -> SyncResponse {
    SyncResponse {
        xp_total,
        level: resolve(xp_total).level,
        habit_completions: vec![],
        journal_entries: vec![],
        focus_sessions: vec![],
        trades: vec![],
    }
}

pub fn habit(id: &str, date: &str, completed: bool) -> HabitCompletion {
    HabitCompletion {
        habit_id: id.into(),
        date: date.into(),
        completed,
    }
}

pub struct Harness {
    pub store: LocalStore,
    pub transport: Arc<MockTransport>,
    pub identity: Arc<CachedIdentity>,
    pub scheduler: SyncScheduler,
}

pub fn harness(transport: MockTransport) -> Harness {
    harness_with(transport, test_config())
}

pub fn harness_with(transport: MockTransport, config: SchedulerConfig) -> Harness {
    let store = LocalStore::in_memory("user-1");
    let transport = Arc::new(transport);
    let identity = Arc::new(CachedIdentity::new("user-1", Some("token-1".into())));
    let scheduler = SyncScheduler::new(
        store.clone(),
        transport.clone(),
        identity.clone(),
        config,
    );
    Harness {
        store,
        transport,
        identity,
        scheduler,
    }
}

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        heartbeat: Duration::from_secs(3600),
        exchange_timeout: Duration::from_secs(5),
    }
}
