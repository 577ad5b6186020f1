//! Client-facing error taxonomy.
//!
//! Classification happens upstream of this module (the coordinator for quota, the resilient
//! caller for provider failures). [`GatewayError`] only maps an already-classified failure to
//! an HTTP status and a stable JSON body.

use crate::outcome::{FailureClass, FatalFailure};
use crate::rate_limit::Denial;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// Every way a request can fail, as the client sees it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rate limited by tier `{}`", .denial.tier)]
    RateLimited { denial: Denial, retry_after_secs: u64 },

    #[error("upstream unavailable after {attempts} attempt(s): {detail}")]
    UpstreamUnavailable { attempts: usize, detail: String },

    #[error("upstream quota exhausted: {detail}")]
    UpstreamQuotaExhausted { detail: String },

    #[error("upstream protocol error: {detail}")]
    UpstreamProtocol { detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        GatewayError::InvalidInput(reason.into())
    }

    /// Build a rate-limit error, computing the wait relative to `now`.
    pub fn rate_limited(denial: Denial, now: DateTime<Utc>) -> Self {
        let retry_after_secs = denial.retry_after_secs(now);
        GatewayError::RateLimited { denial, retry_after_secs }
    }

    pub fn status(&self) -> u16 {
        match self {
            GatewayError::InvalidInput(_) => 400,
            GatewayError::RateLimited { .. } => 429,
            GatewayError::UpstreamUnavailable { .. } => 503,
            GatewayError::UpstreamQuotaExhausted { .. } => 503,
            GatewayError::UpstreamProtocol { .. } => 502,
            GatewayError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for the `error` field.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput(_) => "invalid_input",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            GatewayError::UpstreamQuotaExhausted { .. } => "upstream_quota_exhausted",
            GatewayError::UpstreamProtocol { .. } => "upstream_protocol_error",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Seconds for the `Retry-After` header, when the client should wait.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// JSON body. Upstream and internal detail is included only when `expose_detail` is set.
    pub fn to_body(&self, expose_detail: bool) -> Value {
        match self {
            GatewayError::InvalidInput(reason) => json!({
                "error": self.code(),
                "message": reason,
            }),
            GatewayError::RateLimited { denial, retry_after_secs } => json!({
                "error": self.code(),
                "message": denial.message,
                "reason": denial.tier.as_str(),
                "resetTime": denial.reset_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                "retryAfterSeconds": retry_after_secs,
            }),
            GatewayError::UpstreamUnavailable { detail, .. } => with_detail(
                self.code(),
                "The AI service is temporarily overloaded. Please try again shortly.",
                detail,
                expose_detail,
            ),
            GatewayError::UpstreamQuotaExhausted { detail } => with_detail(
                self.code(),
                "The AI service has reached its usage quota. Please try again later.",
                detail,
                expose_detail,
            ),
            GatewayError::UpstreamProtocol { detail } => with_detail(
                self.code(),
                "The AI service returned an invalid response.",
                detail,
                expose_detail,
            ),
            GatewayError::Internal(detail) => {
                with_detail(self.code(), "Internal server error.", detail, expose_detail)
            }
        }
    }
}

fn with_detail(code: &str, message: &str, detail: &str, expose_detail: bool) -> Value {
    let mut body = json!({ "error": code, "message": message });
    if expose_detail {
        body["detail"] = Value::String(detail.to_string());
    }
    body
}

impl From<FatalFailure> for GatewayError {
    fn from(failure: FatalFailure) -> Self {
        let detail = failure.cause.to_string();
        match failure.class {
            FailureClass::Overloaded => {
                GatewayError::UpstreamUnavailable { attempts: failure.attempts, detail }
            }
            FailureClass::QuotaExhausted => GatewayError::UpstreamQuotaExhausted { detail },
            FailureClass::Protocol => GatewayError::UpstreamProtocol { detail },
            FailureClass::Fatal => GatewayError::Internal(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::TierId;
    use crate::upstream::UpstreamFailure;
    use chrono::TimeZone;

    fn fatal(class: FailureClass) -> FatalFailure {
        FatalFailure { class, cause: UpstreamFailure::provider(500, None, "boom"), attempts: 1 }
    }

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(GatewayError::invalid_input("x").status(), 400);
        assert_eq!(GatewayError::from(fatal(FailureClass::Overloaded)).status(), 503);
        assert_eq!(GatewayError::from(fatal(FailureClass::QuotaExhausted)).status(), 503);
        assert_eq!(GatewayError::from(fatal(FailureClass::Protocol)).status(), 502);
        assert_eq!(GatewayError::from(fatal(FailureClass::Fatal)).status(), 500);
    }

    #[test]
    fn quota_and_overload_messages_differ() {
        let quota = GatewayError::from(fatal(FailureClass::QuotaExhausted)).to_body(false);
        let overloaded = GatewayError::from(fatal(FailureClass::Overloaded)).to_body(false);
        assert_ne!(quota["message"], overloaded["message"]);
        assert_eq!(quota["error"], "upstream_quota_exhausted");
    }

    #[test]
    fn rate_limited_body_has_reason_and_reset() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let denial = Denial {
            tier: TierId::new("user_limit"),
            reset_at: now + chrono::Duration::hours(24),
            message: "Daily limit reached".into(),
            count: 51,
            limit: 50,
        };
        let err = GatewayError::rate_limited(denial, now);

        assert_eq!(err.status(), 429);
        assert_eq!(err.retry_after(), Some(86_400));
        let body = err.to_body(false);
        assert_eq!(body["reason"], "user_limit");
        assert_eq!(body["resetTime"], "2026-03-02T12:00:00.000Z");
        assert_eq!(body["retryAfterSeconds"], 86_400);
    }

    #[test]
    fn detail_is_hidden_unless_exposed() {
        let err = GatewayError::Internal("db password wrong".into());
        assert!(err.to_body(false).get("detail").is_none());
        assert_eq!(err.to_body(true)["detail"], "db password wrong");
    }
}
