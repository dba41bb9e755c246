//! Exchange, reconcile and scheduling behaviour against scripted transports

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ascend_client::{
    IdentityProvider, LocalStore, RunOutcome, SchedulerConfig, SyncError, SyncService, SyncState,
    SyncTrigger, TradeDraft, Tracker,
};
use ascend_types::{FocusSession, HabitCompletion, JournalEntry, SyncResponse, Trade, TradeDirection};
use common::*;
use tokio::sync::Semaphore;

fn seed(store: &LocalStore) {
    store.apply_local_change(habit("read", "2024-05-01", true)).unwrap();
    store.apply_local_change(habit("read", "tue", true)).unwrap();
    store
        .apply_local_change(FocusSession {
            date: "2024-05-01".into(),
            duration_minutes: 45,
            task: "Chart review".into(),
            category: "trading".into(),
        })
        .unwrap();
    store.set_xp(120).unwrap();
}

fn draft() -> TradeDraft {
    TradeDraft {
        pair: "EURUSD".into(),
        direction: TradeDirection::Long,
        entry_price: 1.0800,
        stop_loss: 1.0750,
        take_profit: 1.0900,
        outcome: "open".into(),
        emotion: "calm".into(),
    }
}

#[tokio::test]
async fn test_server_xp_overwrites_local() {
    let h = harness(MockTransport::echo(200));
    h.store.set_xp(120).unwrap();

    let outcome = h.scheduler.sync_now(SyncTrigger::Manual).await;
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completed exchange, got {:?}", outcome);
    };

    assert_eq!(h.transport.requests()[0].xp_total, 120);
    assert_eq!(summary.reconcile.xp_total, 200);
    assert_eq!(h.store.xp().unwrap(), 200);
    assert_eq!(h.store.level().unwrap().level, 1);
}

#[tokio::test]
async fn test_weekday_records_never_transmitted() {
    let h = harness(MockTransport::echo(0));
    seed(&h.store);

    h.scheduler.sync_now(SyncTrigger::Manual).await;

    let sent = &h.transport.requests()[0];
    assert_eq!(sent.habit_completions, vec![habit("read", "2024-05-01", true)]);
    // Still present locally after the reconcile
    assert!(h
        .store
        .read::<HabitCompletion>()
        .unwrap()
        .contains(&habit("read", "tue", true)));
}

#[tokio::test]
async fn test_failures_leave_local_store_untouched() {
    let failures = vec![
        MockTransport::failing(SyncError::Transport("connection refused".into())),
        MockTransport::failing(SyncError::Server {
            status: 500,
            message: "merge failed".into(),
        }),
        MockTransport::failing(SyncError::MalformedResponse("eof".into())),
        // Level inconsistent with the XP total
        MockTransport::new(|_| {
            let mut resp = empty_response(900);
            resp.level = 7;
            Ok(resp)
        }),
        // Duplicate keyed record
        MockTransport::new(|_| {
            let mut resp = empty_response(0);
            resp.habit_completions = vec![
                habit("read", "2024-05-01", false),
                habit("read", "2024-05-01", true),
            ];
            Ok(resp)
        }),
        MockTransport::failing(SyncError::Auth("401".into())),
    ];

    for transport in failures {
        let h = harness(transport);
        seed(&h.store);
        let before = h.store.raw_entries().unwrap();

        let outcome = h.scheduler.sync_now(SyncTrigger::Manual).await;
        assert!(matches!(outcome, RunOutcome::Failed(_)), "{:?}", outcome);

        assert_eq!(h.store.raw_entries().unwrap(), before);
        let status = h.scheduler.status();
        assert_eq!(status.state, SyncState::Error);
        assert!(status.last_synced_at.is_none());
        assert!(status.last_error.is_some());
    }
}

#[tokio::test]
async fn test_failed_exchange_keeps_last_synced_at() {
    let online = Arc::new(AtomicBool::new(true));
    let flag = online.clone();
    let h = harness(MockTransport::new(move |req| {
        if flag.load(Ordering::SeqCst) {
            Ok(echo_response(req, 0))
        } else {
            Err(SyncError::Transport("offline".into()))
        }
    }));

    h.scheduler.sync_now(SyncTrigger::Mount).await;
    let first = h.scheduler.status();
    assert_eq!(first.state, SyncState::Idle);
    let synced_at = first.last_synced_at.expect("timestamp after success");

    online.store(false, Ordering::SeqCst);
    h.scheduler.sync_now(SyncTrigger::Heartbeat).await;

    let status = h.scheduler.status();
    assert_eq!(status.state, SyncState::Error);
    assert_eq!(status.last_synced_at, Some(synced_at));

    online.store(true, Ordering::SeqCst);
    h.scheduler.sync_now(SyncTrigger::FocusRegained).await;
    let status = h.scheduler.status();
    assert_eq!(status.state, SyncState::Idle);
    assert!(status.last_error.is_none());
    assert!(status.last_synced_at >= Some(synced_at));
}

#[tokio::test]
async fn test_auth_failure_invalidates_identity() {
    let h = harness(MockTransport::failing(SyncError::Auth("403 Forbidden".into())));

    let outcome = h.scheduler.sync_now(SyncTrigger::Manual).await;
    assert!(matches!(outcome, RunOutcome::Failed(SyncError::Auth(_))));
    assert_eq!(h.identity.token(), None);
    assert_eq!(h.transport.calls(), 1);

    // No token: fails before any network I/O
    let outcome = h.scheduler.sync_now(SyncTrigger::Manual).await;
    assert!(matches!(outcome, RunOutcome::Failed(SyncError::Auth(_))));
    assert_eq!(h.transport.calls(), 1);

    h.identity.set_token("fresh".into());
    h.scheduler.sync_now(SyncTrigger::Manual).await;
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_triggers_coalesce_while_in_flight() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(MockTransport::echo(0).gated(gate.clone()));

    assert!(h.scheduler.request_sync(SyncTrigger::Mount));
    assert!(h.scheduler.is_in_flight());

    for _ in 0..10 {
        assert!(!h.scheduler.request_sync(SyncTrigger::Mutation));
    }
    assert_eq!(
        h.scheduler.sync_now(SyncTrigger::Manual).await,
        RunOutcome::Coalesced
    );

    gate.add_permits(1);
    h.scheduler.settle().await;

    assert!(!h.scheduler.is_in_flight());
    assert_eq!(h.transport.calls(), 1);
    assert_eq!(h.scheduler.status().state, SyncState::Idle);
}

#[tokio::test]
async fn test_status_reports_syncing_while_in_flight() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(MockTransport::echo(0).gated(gate.clone()));
    let mut rx = h.scheduler.subscribe();
    assert_eq!(rx.borrow().state, SyncState::Idle);

    h.scheduler.request_sync(SyncTrigger::Manual);
    rx.wait_for(|s| s.state == SyncState::Syncing).await.unwrap();

    gate.add_permits(1);
    let status = rx
        .wait_for(|s| s.state == SyncState::Idle)
        .await
        .unwrap()
        .clone();
    assert!(status.last_synced_at.is_some());
}

#[tokio::test]
async fn test_exchange_timeout_surfaces_error() {
    let config = SchedulerConfig {
        heartbeat: Duration::from_secs(3600),
        exchange_timeout: Duration::from_millis(50),
    };
    let h = harness_with(
        MockTransport::echo(0).delayed(Duration::from_secs(10)),
        config,
    );
    h.store.set_xp(10).unwrap();
    let before = h.store.raw_entries().unwrap();

    let outcome = h.scheduler.sync_now(SyncTrigger::Manual).await;
    assert!(matches!(outcome, RunOutcome::Failed(SyncError::Transport(_))));
    assert!(!h.scheduler.is_in_flight());
    assert_eq!(h.store.raw_entries().unwrap(), before);
}

#[tokio::test]
async fn test_first_sync_bootstraps_append_only_kinds() {
    let h = harness(MockTransport::new(|_| {
        let mut resp = empty_response(1500);
        resp.focus_sessions = vec![FocusSession {
            date: "2024-04-01".into(),
            duration_minutes: 25,
            task: "Review".into(),
            category: "study".into(),
        }];
        resp.journal_entries = vec![JournalEntry {
            date: "2024-04-01".into(),
            wins: "Shipped".into(),
            gaps: "".into(),
            fix: "".into(),
            rating: 4,
        }];
        Ok(resp)
    }));

    h.scheduler.sync_now(SyncTrigger::Mount).await;

    assert_eq!(h.store.read::<FocusSession>().unwrap().len(), 1);
    assert_eq!(h.store.read::<JournalEntry>().unwrap().len(), 1);
    assert_eq!(h.store.xp().unwrap(), 1500);
    assert_eq!(h.store.level().unwrap().level, 3);
}

#[tokio::test]
async fn test_append_only_kinds_not_clobbered_after_bootstrap() {
    let h = harness(MockTransport::new(|_| Ok(empty_response(0))));
    h.store
        .apply_local_change(FocusSession {
            date: "2024-05-03".into(),
            duration_minutes: 90,
            task: "Deep work".into(),
            category: "build".into(),
        })
        .unwrap();

    h.scheduler.sync_now(SyncTrigger::Heartbeat).await;
    assert_eq!(h.store.read::<FocusSession>().unwrap().len(), 1);
}

#[tokio::test]
async fn test_repeated_exchanges_converge() {
    let h = harness(MockTransport::echo(0));
    seed(&h.store);

    h.scheduler.sync_now(SyncTrigger::Manual).await;
    let first = h.store.raw_entries().unwrap();
    h.scheduler.sync_now(SyncTrigger::Manual).await;
    assert_eq!(h.store.raw_entries().unwrap(), first);

    let requests = h.transport.requests();
    assert_eq!(requests[0], requests[1]);
}

#[tokio::test]
async fn test_tracker_mutations_trigger_sync() {
    let h = harness(MockTransport::echo(0));
    let tracker = Tracker::new(h.scheduler.clone());

    let trade = tracker.add_trade(draft()).unwrap();
    assert!(trade.natural_key.starts_with("trade-"));
    assert_eq!(trade.risk_reward_ratio, 2.0);
    h.scheduler.settle().await;

    assert!(h.transport.calls() >= 1);
    let sent = h.transport.requests().pop().unwrap();
    assert_eq!(sent.trades, vec![trade]);
}

#[tokio::test]
async fn test_tracker_trade_keys_unique() {
    let h = harness(MockTransport::failing(SyncError::Transport("offline".into())));
    let tracker = Tracker::new(h.scheduler.clone());

    let mut keys = Vec::new();
    for _ in 0..5 {
        keys.push(tracker.add_trade(draft()).unwrap().natural_key);
    }
    h.scheduler.settle().await;

    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 5);
    assert_eq!(h.store.read::<Trade>().unwrap().len(), 5);
}

#[tokio::test]
async fn test_deleted_trade_is_not_resubmitted() {
    let h = harness(MockTransport::new(|req| {
        let mut resp = echo_response(req, 0);
        resp.trades.clear();
        Ok(resp)
    }));
    let tracker = Tracker::new(h.scheduler.clone());

    let keep = tracker.add_trade(draft()).unwrap();
    h.scheduler.settle().await;
    let removed = tracker.add_trade(draft()).unwrap();
    h.scheduler.settle().await;

    assert!(tracker.delete_trade(&removed.natural_key).unwrap());
    h.scheduler.sync_now(SyncTrigger::Manual).await;

    let sent = h.transport.requests().pop().unwrap();
    assert_eq!(sent.trades, vec![keep]);
}

#[tokio::test]
async fn test_award_xp_is_a_proposal() {
    let h = harness(MockTransport::new(|_| Ok(empty_response(800))));
    let tracker = Tracker::new(h.scheduler.clone());

    let progress = tracker.award_xp(50).unwrap();
    assert_eq!(progress.points_into_level, 50);
    h.scheduler.settle().await;

    assert_eq!(h.transport.requests()[0].xp_total, 50);
    assert_eq!(h.store.xp().unwrap(), 800);
    assert_eq!(tracker.level().unwrap().level, 2);
}

#[tokio::test]
async fn test_heartbeat_runs_exchanges() {
    let config = SchedulerConfig {
        heartbeat: Duration::from_millis(40),
        exchange_timeout: Duration::from_secs(5),
    };
    let h = harness_with(MockTransport::echo(0), config);

    h.scheduler.mount();
    tokio::time::sleep(Duration::from_millis(300)).await;
    h.scheduler.stop_heartbeat();
    h.scheduler.settle().await;

    assert!(h.transport.calls() >= 2, "calls = {}", h.transport.calls());
}

#[tokio::test]
async fn test_service_boundary_operations() {
    let service = SyncService::new();

    let unknown = service.get_sync_status("nobody");
    assert_eq!(unknown.state, SyncState::Idle);
    assert!(unknown.last_synced_at.is_none());
    service.request_sync("nobody");

    let h = harness(MockTransport::echo(0));
    service.register(h.scheduler.clone()).await;
    service.request_sync("user-1");
    h.scheduler.settle().await;

    let view = service.get_sync_status("user-1");
    assert_eq!(view.state, SyncState::Idle);
    assert!(view.last_synced_at.is_some());
    assert_eq!(h.transport.calls(), 1);

    service.signal("user-1", SyncTrigger::FocusRegained);
    h.scheduler.settle().await;
    assert_eq!(h.transport.calls(), 2);

    assert!(service.unregister("user-1").is_some());
    assert_eq!(service.get_sync_status("user-1").last_synced_at, None);
}

#[tokio::test]
async fn test_edit_during_exchange_survives_reconcile() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(
        MockTransport::new(|req| {
            let mut resp: SyncResponse = echo_response(req, 0);
            resp.xp_total = 300;
            resp.level = 1;
            Ok(resp)
        })
        .gated(gate.clone()),
    );
    h.store.apply_local_change(habit("gym", "2024-05-04", true)).unwrap();

    h.scheduler.request_sync(SyncTrigger::Manual);
    while h.transport.calls() == 0 {
        tokio::task::yield_now().await;
    }
    // Un-tick while the request is on the wire
    h.store.apply_local_change(habit("gym", "2024-05-04", false)).unwrap();
    h.store.propose_xp(100).unwrap();

    gate.add_permits(1);
    h.scheduler.settle().await;

    assert_eq!(
        h.store.read::<HabitCompletion>().unwrap(),
        vec![habit("gym", "2024-05-04", false)]
    );
    assert_eq!(h.store.xp().unwrap(), 300);
}

#[tokio::test]
async fn test_non_finite_trade_rejected_before_storage() {
    let h = harness(MockTransport::echo(0));
    let tracker = Tracker::new(h.scheduler.clone());

    let broken = TradeDraft {
        entry_price: f64::NAN,
        ..draft()
    };
    assert!(matches!(
        tracker.add_trade(broken),
        Err(SyncError::InvalidRecord(_))
    ));
    let unbounded = TradeDraft {
        take_profit: f64::INFINITY,
        ..draft()
    };
    assert!(matches!(
        tracker.add_trade(unbounded),
        Err(SyncError::InvalidRecord(_))
    ));
    assert!(h.store.read::<Trade>().unwrap().is_empty());
    assert_eq!(h.transport.calls(), 0);

    let trade = tracker.add_trade(draft()).unwrap();
    h.scheduler.settle().await;
    assert_eq!(h.store.read::<Trade>().unwrap(), vec![trade.clone()]);
    assert_eq!(h.transport.requests().pop().unwrap().trades, vec![trade]);
}

#[tokio::test]
async fn test_out_of_range_rating_stays_local() {
    let h = harness(MockTransport::new(|req| {
        req.validate()
            .map_err(|e| SyncError::Server {
                status: 400,
                message: e.to_string(),
            })?;
        Ok(echo_response(req, 0))
    }));
    seed(&h.store);
    let unrated = JournalEntry {
        date: "2024-05-01".into(),
        wins: "shipped".into(),
        gaps: "".into(),
        fix: "".into(),
        rating: 0,
    };
    h.store.apply_local_change(unrated.clone()).unwrap();

    let outcome = h.scheduler.sync_now(SyncTrigger::Manual).await;
    assert!(matches!(outcome, RunOutcome::Completed(_)), "{:?}", outcome);

    let sent = &h.transport.requests()[0];
    assert!(sent.journal_entries.is_empty());
    assert_eq!(sent.habit_completions, vec![habit("read", "2024-05-01", true)]);
    assert_eq!(sent.focus_sessions.len(), 1);
    assert_eq!(h.scheduler.status().state, SyncState::Idle);
    assert_eq!(h.store.read::<JournalEntry>().unwrap(), vec![unrated]);
}

#[tokio::test]
async fn test_reregister_waits_for_exchange_in_flight() {
    let service = SyncService::new();
    let gate = Arc::new(Semaphore::new(0));
    let old = harness(MockTransport::echo(0).gated(gate.clone()));
    service.register(old.scheduler.clone()).await;

    old.scheduler.request_sync(SyncTrigger::Manual);
    while old.transport.calls() == 0 {
        tokio::task::yield_now().await;
    }

    let replacement = harness(MockTransport::echo(0));
    let pending = tokio::spawn({
        let service = service.clone();
        let scheduler = replacement.scheduler.clone();
        async move { service.register(scheduler).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());
    // Nobody can start a second exchange for this identity meanwhile
    service.request_sync("user-1");
    assert_eq!(replacement.transport.calls(), 0);

    gate.add_permits(1);
    pending.await.unwrap();

    assert!(!old.scheduler.is_in_flight());
    assert_eq!(old.transport.calls(), 1);
    service.request_sync("user-1");
    replacement.scheduler.settle().await;
    assert_eq!(replacement.transport.calls(), 1);
}
