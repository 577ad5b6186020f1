//! Convenient re-exports for common quotagate types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    clock::{Clock, ManualClock, SystemClock},
    error::GatewayError,
    handler::{Gateway, GatewayResponse, GatewaySettings},
    outcome::{classify, CallOutcome, FailureClass, FatalFailure},
    rate_limit::{AdmissionDecision, Denial, RateLimitCoordinator},
    retry::{ResilientCaller, RetrySettings},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
    store::{CounterReading, CounterStore, InMemoryCounterStore, StoreError},
    telemetry::{GatewayEvent, LogSink, MemorySink, NullSink, TelemetrySink},
    tier::{CallerIdentity, KeyRule, RateLimitTier, TierId},
    upstream::{UpstreamClient, UpstreamFailure, UpstreamReply, UpstreamRequest},
};
