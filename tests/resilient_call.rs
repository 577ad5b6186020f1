mod common;

use common::{overloaded, quota_exhausted, ScriptedUpstream};
use quotagate::telemetry::{GatewayEvent, MemorySink, RetryEvent, UpstreamOutcome};
use quotagate::upstream::UpstreamFailure;
use quotagate::{
    Backoff, CallOutcome, FailureClass, ResilientCaller, RetrySettings, TrackingSleeper, UpstreamReply,
    UpstreamRequest,
};
use std::time::Duration;

fn request() -> UpstreamRequest {
    UpstreamRequest::chat("hello", Vec::new())
}

#[tokio::test]
async fn overload_twice_then_success() {
    let upstream = ScriptedUpstream::new(vec![overloaded(), overloaded(), Ok(UpstreamReply::Text("hi".into()))]);
    let sleeper = TrackingSleeper::new();
    let sink = MemorySink::new();
    let caller = ResilientCaller::default().with_sleeper(sleeper.clone()).with_sink(sink.clone());

    let outcome = caller.call(&upstream, &request()).await;

    assert_eq!(outcome, CallOutcome::Success(UpstreamReply::Text("hi".into())));
    assert_eq!(upstream.calls(), 3);
    assert_eq!(sleeper.calls(), vec![Duration::from_secs(1), Duration::from_secs(2)]);

    let events = sink.events();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], GatewayEvent::Retry(RetryEvent::Attempt { attempt: 1, .. })));
    assert!(matches!(events[1], GatewayEvent::Retry(RetryEvent::Attempt { attempt: 2, .. })));
    assert!(matches!(events[2], GatewayEvent::Upstream(UpstreamOutcome::Success { attempts: 3, .. })));
}

#[tokio::test]
async fn every_attempt_sends_the_same_request() {
    let upstream = ScriptedUpstream::new(vec![overloaded(), Ok(UpstreamReply::Text("ok".into()))]);
    let caller = ResilientCaller::default().with_sleeper(TrackingSleeper::new());

    caller.call(&upstream, &request()).await;

    let seen = upstream.requests();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], seen[1]);
}

#[tokio::test]
async fn quota_is_surfaced_after_one_attempt() {
    let upstream = ScriptedUpstream::new(vec![quota_exhausted(), Ok(UpstreamReply::Text("never".into()))]);
    let sleeper = TrackingSleeper::new();
    let caller = ResilientCaller::default().with_sleeper(sleeper.clone());

    match caller.call(&upstream, &request()).await {
        CallOutcome::FatalFailure(fatal) => assert_eq!(fatal.class, FailureClass::QuotaExhausted),
        other => panic!("expected quota failure, got {:?}", other),
    }
    assert_eq!(upstream.calls(), 1);
    assert!(sleeper.calls().is_empty());
}

#[tokio::test]
async fn protocol_failure_is_not_retried() {
    let upstream = ScriptedUpstream::new(vec![Err(UpstreamFailure::protocol("no candidates"))]);
    let caller = ResilientCaller::default().with_sleeper(TrackingSleeper::new());

    match caller.call(&upstream, &request()).await {
        CallOutcome::FatalFailure(fatal) => {
            assert_eq!(fatal.class, FailureClass::Protocol);
            assert_eq!(fatal.attempts, 1);
        }
        other => panic!("expected protocol failure, got {:?}", other),
    }
}

#[tokio::test]
async fn budget_is_configurable() {
    let upstream = ScriptedUpstream::new(vec![overloaded(); 6]);
    let sleeper = TrackingSleeper::new();
    let settings = RetrySettings::new(4, Backoff::exponential(Duration::from_millis(100)));
    let caller = ResilientCaller::new(settings).with_sleeper(sleeper.clone());

    assert!(!caller.call(&upstream, &request()).await.is_success());
    assert_eq!(upstream.calls(), 5);
    assert_eq!(sleeper.total(), Duration::from_millis(100 + 200 + 400 + 800));
}

#[tokio::test(start_paused = true)]
async fn real_time_backoff_is_one_then_two_seconds() {
    let upstream = ScriptedUpstream::new(vec![overloaded(), overloaded(), overloaded()]);
    let caller = ResilientCaller::default();
    let start = tokio::time::Instant::now();

    let outcome = caller.call(&upstream, &request()).await;

    assert!(matches!(outcome, CallOutcome::FatalFailure(ref f) if f.class == FailureClass::Overloaded));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "elapsed {:?}", elapsed);
}
