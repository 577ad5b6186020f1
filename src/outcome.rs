//! Failure classification for upstream calls.
//!
//! Raw provider failures are inspected exactly once, here. Everything downstream of the
//! resilient call wrapper works with the closed [`FailureClass`] set.

use crate::upstream::{FailureSource, UpstreamFailure};
use std::fmt;

/// Closed set of upstream failure classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The provider is out of capacity. The only class the wrapper retries.
    Overloaded,
    /// The provider-side quota is exhausted. Retrying now cannot succeed.
    QuotaExhausted,
    /// The provider answered success with an empty or malformed body.
    Protocol,
    /// Anything else: bad request, auth failure, network error.
    Fatal,
}

impl FailureClass {
    pub fn is_transient(&self) -> bool {
        matches!(self, FailureClass::Overloaded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Overloaded => "overloaded",
            FailureClass::QuotaExhausted => "quota_exhausted",
            FailureClass::Protocol => "protocol",
            FailureClass::Fatal => "fatal",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify one failed attempt.
///
/// Status and condition code win over message text; the message is only consulted when the
/// provider gave neither a recognised status nor code.
pub fn classify(failure: &UpstreamFailure) -> FailureClass {
    match failure.origin {
        FailureSource::Protocol => return FailureClass::Protocol,
        FailureSource::Transport => return FailureClass::Fatal,
        FailureSource::Provider => {}
    }

    let code = failure.code.as_deref().map(str::to_ascii_uppercase);
    match (failure.status, code.as_deref()) {
        (Some(429), _) | (_, Some("RESOURCE_EXHAUSTED")) => FailureClass::QuotaExhausted,
        (Some(503), _) | (_, Some("UNAVAILABLE")) => FailureClass::Overloaded,
        _ => {
            let message = failure.message.to_ascii_lowercase();
            if message.contains("quota") {
                FailureClass::QuotaExhausted
            } else if message.contains("overloaded") {
                FailureClass::Overloaded
            } else {
                FailureClass::Fatal
            }
        }
    }
}

/// A failure the wrapper gives back to its caller. Never retried further.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{class} after {attempts} attempt(s): {cause}")]
pub struct FatalFailure {
    pub class: FailureClass,
    /// The last failed attempt.
    #[source]
    pub cause: UpstreamFailure,
    /// Attempts made, including the first.
    pub attempts: usize,
}

/// Result of one upstream attempt, or of a whole wrapped call.
///
/// Per attempt all three variants occur. [`crate::retry::ResilientCaller::call`] resolves
/// `TransientFailure` internally and only ever returns `Success` or `FatalFailure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    Success(T),
    TransientFailure(UpstreamFailure),
    FatalFailure(FatalFailure),
}

impl<T> CallOutcome<T> {
    /// Classify the result of attempt number `attempt` (1-indexed).
    pub fn from_attempt(result: Result<T, UpstreamFailure>, attempt: usize) -> Self {
        match result {
            Ok(value) => CallOutcome::Success(value),
            Err(failure) => match classify(&failure) {
                FailureClass::Overloaded => CallOutcome::TransientFailure(failure),
                class => CallOutcome::FatalFailure(FatalFailure { class, cause: failure, attempts: attempt }),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    /// Collapse into a `Result`. A leftover transient failure counts as unavailability.
    pub fn into_result(self) -> Result<T, FatalFailure> {
        match self {
            CallOutcome::Success(value) => Ok(value),
            CallOutcome::FatalFailure(fatal) => Err(fatal),
            CallOutcome::TransientFailure(cause) => {
                Err(FatalFailure { class: FailureClass::Overloaded, cause, attempts: 1 })
            }
        }
    }
}
