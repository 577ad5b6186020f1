mod common;

use common::{CountingStore, DownStore};
use quotagate::clock::{Clock, ManualClock};
use quotagate::presets;
use quotagate::telemetry::{AdmissionEvent, GatewayEvent, MemorySink};
use quotagate::{AdmissionDecision, CallerIdentity, InMemoryCounterStore, RateLimitCoordinator, RateLimitTier};
use std::sync::Arc;
use std::time::Duration;

fn caller(id: &str) -> CallerIdentity {
    CallerIdentity::new(Some(id))
}

#[tokio::test]
async fn limit_plus_one_is_denied_with_window_reset() {
    let clock = ManualClock::default();
    let start = clock.now();
    let store = InMemoryCounterStore::with_clock(clock.clone());
    let coordinator = RateLimitCoordinator::new(store, presets::reference_tiers(10_000, 10_000, 50).unwrap());

    for i in 0..50 {
        clock.advance(Duration::from_secs(60));
        assert!(coordinator.admit(&caller("A")).await.is_allowed(), "request {} denied", i + 1);
    }
    match coordinator.admit(&caller("A")).await {
        AdmissionDecision::Denied(denial) => {
            assert_eq!(denial.tier.as_str(), "user_limit");
            // the per-caller window opened with the first request, one minute in
            assert_eq!(denial.reset_at, start + chrono::Duration::seconds(60) + chrono::Duration::hours(24));
        }
        other => panic!("expected denial, got {:?}", other),
    }
}

#[tokio::test]
async fn global_daily_is_checked_before_minute_and_caller() {
    let store = Arc::new(InMemoryCounterStore::new());
    let coordinator = RateLimitCoordinator::new(store.clone(), presets::reference_tiers(1, 1, 1).unwrap());

    assert!(coordinator.admit(&caller("A")).await.is_allowed());
    // every tier is exhausted now; the broadest one is reported
    let decision = coordinator.admit(&caller("B")).await;
    assert_eq!(decision.violated_tier().map(|t| t.as_str()), Some("global_limit"));
    // B was never charged against its own bucket
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn minute_tier_resets_after_window() {
    let clock = ManualClock::default();
    let store = InMemoryCounterStore::with_clock(clock.clone());
    let coordinator = RateLimitCoordinator::new(store, presets::reference_tiers(100, 2, 100).unwrap());

    assert!(coordinator.admit(&caller("A")).await.is_allowed());
    assert!(coordinator.admit(&caller("B")).await.is_allowed());
    let decision = coordinator.admit(&caller("C")).await;
    assert_eq!(decision.violated_tier().map(|t| t.as_str()), Some("minute_limit"));
    assert_eq!(decision.retry_after(clock.now()), Some(60));

    clock.advance(Duration::from_secs(60));
    assert!(coordinator.admit(&caller("C")).await.is_allowed());
}

#[tokio::test]
async fn zero_limit_denies_everything() {
    let tier = RateLimitTier::global("closed", 0, Duration::from_secs(60)).unwrap();
    let coordinator = RateLimitCoordinator::new(InMemoryCounterStore::new(), vec![tier]);
    assert!(!coordinator.admit(&caller("A")).await.is_allowed());
}

#[tokio::test]
async fn store_outage_admits_and_stops_checking() {
    let store = DownStore::default();
    let sink = MemorySink::new();
    let coordinator = RateLimitCoordinator::new(store.clone(), presets::reference_tiers(0, 0, 0).unwrap())
        .with_sink(sink.clone());

    for _ in 0..5 {
        assert!(coordinator.admit(&caller("A")).await.is_allowed());
    }
    // one failed tier per request, then no further tiers
    assert_eq!(store.calls(), 5);
    let fail_opens = sink
        .events()
        .iter()
        .filter(|e| matches!(e, GatewayEvent::Admission(AdmissionEvent::FailOpen { .. })))
        .count();
    assert_eq!(fail_opens, 5);
}

#[tokio::test]
async fn blank_callers_share_the_degraded_bucket() {
    let tier = RateLimitTier::per_caller("user_limit", 1, Duration::from_secs(60)).unwrap();
    let coordinator = RateLimitCoordinator::new(InMemoryCounterStore::new(), vec![tier]);

    assert!(coordinator.admit(&CallerIdentity::new(None)).await.is_allowed());
    assert!(!coordinator.admit(&CallerIdentity::new(Some("  "))).await.is_allowed());
    assert!(coordinator.admit(&caller("A")).await.is_allowed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admissions_never_exceed_limit() {
    let store = CountingStore::new(InMemoryCounterStore::new());
    let tier = RateLimitTier::global("global_limit", 25, Duration::from_secs(60)).unwrap();
    let coordinator = Arc::new(RateLimitCoordinator::new(store.clone(), vec![tier]));

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.admit(&CallerIdentity::new(Some(i.to_string().as_str()))).await })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap().is_allowed() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 25);
    assert_eq!(store.calls(), 100);
}
