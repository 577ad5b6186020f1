//! Bounded retry around one upstream call.
//!
//! Semantics:
//! - `max_retries` counts retries only; total attempts are `max_retries + 1`.
//! - Only [`FailureClass::Overloaded`] is retried. Quota exhaustion, protocol and fatal failures
//!   return after the attempt that produced them.
//! - Retry `n` (1-indexed) sleeps `backoff.delay(n)` first. With the default linear one second
//!   base that is 1s, then 2s.
//! - The sleeper controls how delays are applied (production uses `TokioSleeper`; tests inject
//!   `InstantSleeper`/`TrackingSleeper`).
//!
//! Invariants:
//! - Attempts never exceed `max_retries + 1`.
//! - [`ResilientCaller::call`] returns `Success` or `FatalFailure`, never `TransientFailure`.
//!
//! Example
//! ```rust
//! use quotagate::retry::{ResilientCaller, RetrySettings};
//! use quotagate::sleeper::InstantSleeper;
//!
//! let caller = ResilientCaller::new(RetrySettings::default()).with_sleeper(InstantSleeper);
//! assert_eq!(caller.settings().max_attempts(), 3);
//! ```

use crate::backoff::Backoff;
use crate::outcome::{CallOutcome, FailureClass, FatalFailure};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{emit_best_effort, GatewayEvent, NullSink, RetryEvent, TelemetrySink, UpstreamOutcome};
use crate::upstream::{UpstreamClient, UpstreamReply, UpstreamRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Retry budget and delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_retries: usize,
    pub backoff: Backoff,
}

impl RetrySettings {
    pub fn new(max_retries: usize, backoff: Backoff) -> Self {
        Self { max_retries, backoff }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_retries: 2, backoff: Backoff::linear(Duration::from_secs(1)) }
    }
}

/// Calls an [`UpstreamClient`] with bounded retries on overload.
#[derive(Clone)]
pub struct ResilientCaller<S = NullSink> {
    settings: RetrySettings,
    sleeper: Arc<dyn Sleeper>,
    sink: S,
}

impl<S> std::fmt::Debug for ResilientCaller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientCaller")
            .field("settings", &self.settings)
            .field("sleeper", &self.sleeper)
            .field("sink", &"<sink>")
            .finish()
    }
}

impl ResilientCaller<NullSink> {
    pub fn new(settings: RetrySettings) -> Self {
        Self { settings, sleeper: Arc::new(TokioSleeper), sink: NullSink }
    }
}

impl Default for ResilientCaller<NullSink> {
    fn default() -> Self {
        Self::new(RetrySettings::default())
    }
}

impl<S> ResilientCaller<S> {
    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<Sl>(mut self, sleeper: Sl) -> Self
    where
        Sl: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Route retry and outcome events to `sink`.
    pub fn with_sink<S2>(self, sink: S2) -> ResilientCaller<S2>
    where
        S2: TelemetrySink,
    {
        ResilientCaller { settings: self.settings, sleeper: self.sleeper, sink }
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }
}

impl<S> ResilientCaller<S>
where
    S: TelemetrySink,
{
    /// Send `request`, retrying overload failures within the budget.
    pub async fn call(
        &self,
        client: &dyn UpstreamClient,
        request: &UpstreamRequest,
    ) -> CallOutcome<UpstreamReply> {
        let start = Instant::now();
        let max_attempts = self.settings.max_attempts();
        let mut attempt = 1;

        loop {
            match CallOutcome::from_attempt(client.send(request).await, attempt) {
                CallOutcome::Success(reply) => {
                    if attempt > 1 {
                        tracing::info!(attempts = attempt, "upstream recovered after retry");
                    }
                    self.emit(GatewayEvent::Upstream(UpstreamOutcome::Success {
                        attempts: attempt,
                        duration: start.elapsed(),
                    }))
                    .await;
                    return CallOutcome::Success(reply);
                }
                CallOutcome::FatalFailure(fatal) => {
                    tracing::warn!(
                        class = %fatal.class,
                        attempts = attempt,
                        error = %fatal.cause,
                        "upstream call failed"
                    );
                    self.emit_failure(fatal.class, attempt, start).await;
                    return CallOutcome::FatalFailure(fatal);
                }
                CallOutcome::TransientFailure(cause) => {
                    if attempt >= max_attempts {
                        tracing::warn!(
                            attempts = attempt,
                            error = %cause,
                            "upstream still overloaded; retries exhausted"
                        );
                        self.emit(GatewayEvent::Retry(RetryEvent::Exhausted {
                            total_attempts: attempt,
                            total_duration: start.elapsed(),
                        }))
                        .await;
                        self.emit_failure(FailureClass::Overloaded, attempt, start).await;
                        return CallOutcome::FatalFailure(FatalFailure {
                            class: FailureClass::Overloaded,
                            cause,
                            attempts: attempt,
                        });
                    }

                    let delay = self.settings.backoff.delay(attempt);
                    tracing::warn!(
                        retry = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %cause,
                        "upstream overloaded; retrying"
                    );
                    self.emit(GatewayEvent::Retry(RetryEvent::Attempt { attempt, delay })).await;
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn emit_failure(&self, class: FailureClass, attempts: usize, start: Instant) {
        self.emit(GatewayEvent::Upstream(UpstreamOutcome::Failure {
            class,
            attempts,
            duration: start.elapsed(),
        }))
        .await;
    }

    async fn emit(&self, event: GatewayEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}
