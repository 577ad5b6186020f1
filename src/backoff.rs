//! Delay schedules between upstream retries.
//!
//! Attempt semantics: retry `n` (1-indexed) waits `delay(n)`; `delay(0)` is the initial call and
//! is always zero. The gateway's reference schedule is linear, so with a one second base the
//! first retry waits 1s and the second 2s.
//!
//! ```rust
//! use std::time::Duration;
//! use quotagate::Backoff;
//!
//! let backoff = Backoff::linear(Duration::from_secs(1));
//! assert_eq!(backoff.delay(1), Duration::from_secs(1));
//! assert_eq!(backoff.delay(2), Duration::from_secs(2));
//! ```
//!
//! Overflow behavior: computations that would overflow saturate to [`MAX_BACKOFF`].

use serde::Deserialize;
use std::time::Duration;

/// Upper bound for any computed delay (1 hour). Upstream calls are interactive; anything
/// longer is a misconfiguration.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for linear or exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Constant { delay: Duration },
    /// `base * n` before retry `n`.
    Linear { base: Duration, max: Option<Duration> },
    /// `base * 2^(n-1)` before retry `n`.
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base, max: None }
    }

    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Cap linear or exponential growth.
    pub fn with_max(self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match self {
            Backoff::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
            Backoff::Linear { base, .. } | Backoff::Exponential { base, .. } if max < base => {
                Err(BackoffError::MaxLessThanBase { base, max })
            }
            Backoff::Linear { base, .. } => Ok(Backoff::Linear { base, max: Some(max) }),
            Backoff::Exponential { base, .. } => Ok(Backoff::Exponential { base, max: Some(max) }),
        }
    }

    /// Delay before retry `attempt` (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let raw = match *self {
            Backoff::Constant { delay } => delay,
            Backoff::Linear { base, max } => {
                let n = attempt.min(u32::MAX as usize) as u32;
                cap(base.checked_mul(n).unwrap_or(MAX_BACKOFF), max)
            }
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let multiplier = 2u128.saturating_pow(exponent);
                let nanos = base.as_nanos().saturating_mul(multiplier).min(MAX_BACKOFF.as_nanos());
                cap(Duration::from_nanos(nanos as u64), max)
            }
        };
        raw.min(MAX_BACKOFF)
    }

    /// Sum of the delays slept across `retries` retries.
    pub fn total_delay(&self, retries: usize) -> Duration {
        (1..=retries).map(|n| self.delay(n)).fold(Duration::ZERO, |acc, d| acc.saturating_add(d))
    }
}

fn cap(delay: Duration, max: Option<Duration>) -> Duration {
    max.map(|m| delay.min(m)).unwrap_or(delay)
}

/// Serialized form used by configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Constant,
    Linear,
    Exponential,
}

impl BackoffKind {
    pub fn with_base(self, base: Duration) -> Backoff {
        match self {
            BackoffKind::Constant => Backoff::constant(base),
            BackoffKind::Linear => Backoff::linear(base),
            BackoffKind::Exponential => Backoff::exponential(base),
        }
    }
}
