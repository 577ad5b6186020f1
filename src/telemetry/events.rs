use crate::outcome::FailureClass;
use crate::tier::TierId;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Events emitted while a request moves through the gateway.
///
/// Admission, retry and upstream stages each report what they decided. Sinks can log,
/// aggregate or forward these.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Rate limit coordinator events
    Admission(AdmissionEvent),
    /// Resilient call wrapper retry events
    Retry(RetryEvent),
    /// Final upstream outcome for one inbound request
    Upstream(UpstreamOutcome),
}

/// Events emitted by the rate limit coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// Every tier passed.
    Allowed {
        /// Tiers evaluated (all of them)
        tiers_checked: usize,
    },
    /// A tier was violated; later tiers were not charged.
    Denied {
        tier: TierId,
        count: u64,
        limit: u64,
        reset_at: DateTime<Utc>,
    },
    /// The counter store failed; the request was admitted without enforcement.
    FailOpen {
        /// Tier being checked when the store failed
        tier: TierId,
        error: String,
    },
}

/// Events emitted by the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retry is about to be made.
    ///
    /// Emitted before sleeping.
    Attempt {
        /// The retry number (1-indexed)
        attempt: usize,
        /// The backoff delay before this retry
        delay: Duration,
    },
    /// The retry budget ran out on a transient failure.
    Exhausted {
        /// Total number of attempts made
        total_attempts: usize,
        /// Total time spent, sleeps included
        total_duration: Duration,
    },
}

/// How an upstream call ended, after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamOutcome {
    Success { attempts: usize, duration: Duration },
    Failure { class: FailureClass, attempts: usize, duration: Duration },
}

impl fmt::Display for GatewayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayEvent::Admission(event) => write!(f, "Admission::{}", event),
            GatewayEvent::Retry(event) => write!(f, "Retry::{}", event),
            GatewayEvent::Upstream(event) => write!(f, "Upstream::{}", event),
        }
    }
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Allowed { tiers_checked } => {
                write!(f, "Allowed(tiers={})", tiers_checked)
            }
            AdmissionEvent::Denied { tier, count, limit, reset_at } => {
                write!(f, "Denied(tier={}, {}/{}, reset={})", tier, count, limit, reset_at.to_rfc3339())
            }
            AdmissionEvent::FailOpen { tier, error } => {
                write!(f, "FailOpen(tier={}, error={})", tier, error)
            }
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => {
                write!(f, "Attempt(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Exhausted { total_attempts, total_duration } => {
                write!(f, "Exhausted(attempts={}, duration={:?})", total_attempts, total_duration)
            }
        }
    }
}

impl fmt::Display for UpstreamOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamOutcome::Success { attempts, duration } => {
                write!(f, "Success(attempts={}, duration={:?})", attempts, duration)
            }
            UpstreamOutcome::Failure { class, attempts, duration } => {
                write!(f, "Failure(class={}, attempts={}, duration={:?})", class, attempts, duration)
            }
        }
    }
}
