//! Rate limit tiers: one immutable quota policy each.
//!
//! A tier is plain data (id, limit, window) plus a pure rule that turns a caller identity into
//! the counter key the tier charges. Global tiers ignore the caller; per-caller tiers embed it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Key used for callers whose identity could not be determined.
pub const UNKNOWN_CALLER: &str = "unknown";

/// Stable identifier of a tier, reported to clients as the denial `reason`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TierId(Arc<str>);

impl TierId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TierId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque caller identity (typically the client network address).
///
/// Missing or blank identities collapse into one shared degraded bucket so global tiers still
/// apply and unidentified callers share a single per-caller quota.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerIdentity(String);

impl CallerIdentity {
    pub fn new(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(id) if !id.is_empty() => Self(id.to_string()),
            _ => Self::unknown(),
        }
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_CALLER.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_degraded(&self) -> bool {
        self.0 == UNKNOWN_CALLER
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<std::net::IpAddr> for CallerIdentity {
    fn from(addr: std::net::IpAddr) -> Self {
        Self(addr.to_string())
    }
}

/// How a tier derives its counter key from the caller.
#[derive(Clone)]
pub enum KeyRule {
    /// One counter for everybody: `<prefix>`.
    Global,
    /// One counter per caller: `<prefix>:<caller>`.
    PerCaller,
    /// Anything else; must be pure.
    Custom(Arc<dyn Fn(&CallerIdentity) -> String + Send + Sync>),
}

impl fmt::Debug for KeyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRule::Global => f.write_str("Global"),
            KeyRule::PerCaller => f.write_str("PerCaller"),
            KeyRule::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Errors raised when constructing a tier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TierError {
    #[error("tier id must not be empty")]
    EmptyId,
    #[error("tier `{0}` has a zero-length window")]
    ZeroWindow(String),
}

/// One named quota policy.
#[derive(Debug, Clone)]
pub struct RateLimitTier {
    id: TierId,
    limit: u64,
    window: Duration,
    rule: KeyRule,
    message: String,
}

impl RateLimitTier {
    /// Build a tier. A `limit` of zero is legal and denies every request.
    pub fn new(
        id: impl Into<TierId>,
        limit: u64,
        window: Duration,
        rule: KeyRule,
    ) -> Result<Self, TierError> {
        let id = id.into();
        if id.as_str().trim().is_empty() {
            return Err(TierError::EmptyId);
        }
        if window.is_zero() {
            return Err(TierError::ZeroWindow(id.to_string()));
        }
        let message = format!("rate limit `{}` exceeded", id);
        Ok(Self { id, limit, window, rule, message })
    }

    pub fn global(id: impl Into<TierId>, limit: u64, window: Duration) -> Result<Self, TierError> {
        Self::new(id, limit, window, KeyRule::Global)
    }

    pub fn per_caller(
        id: impl Into<TierId>,
        limit: u64,
        window: Duration,
    ) -> Result<Self, TierError> {
        Self::new(id, limit, window, KeyRule::PerCaller)
    }

    /// Human-readable text placed in denial responses.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn id(&self) -> &TierId {
        &self.id
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Counter key this tier charges for `caller`.
    pub fn key_for(&self, caller: &CallerIdentity) -> String {
        match &self.rule {
            KeyRule::Global => self.id.to_string(),
            KeyRule::PerCaller => format!("{}:{}", self.id, caller.as_str()),
            KeyRule::Custom(f) => f(caller),
        }
    }

    /// A post-increment `count` violates the tier when it exceeds the limit.
    pub fn is_violated_by(&self, count: u64) -> bool {
        count > self.limit
    }
}
