//! Layered admission control.
//!
//! [`RateLimitCoordinator`] walks an ordered list of [`RateLimitTier`]s and charges each one
//! through the [`CounterStore`]. Evaluation short-circuits on the first violated tier, so later
//! tiers are never charged for a request that is already rejected.
//!
//! # Ordering
//!
//! Tiers are evaluated in list order. The reference set (see [`crate::presets`]) puts the
//! broadest constraint first: global daily, then global per-minute, then per-caller daily.
//!
//! # Store failures
//!
//! If the store errors on any tier, the coordinator fails open: the request is admitted, no
//! further tiers are checked, and the degradation is logged and emitted as
//! [`AdmissionEvent::FailOpen`]. The policy is the same for every tier.
//!
//! A store that does not answer within the store timeout ([`DEFAULT_STORE_TIMEOUT`] unless set
//! with [`RateLimitCoordinator::with_store_timeout`]) counts as unavailable.

use crate::store::{CounterReading, CounterStore, StoreError};
use crate::telemetry::{emit_best_effort, AdmissionEvent, GatewayEvent, NullSink, TelemetrySink};
use crate::tier::{CallerIdentity, RateLimitTier, TierId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// How long one tier's increment may take before the store is treated as unavailable.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

/// Details of a rejected admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    /// The first tier that was violated.
    pub tier: TierId,
    /// When that tier's window resets.
    pub reset_at: DateTime<Utc>,
    /// Client-facing explanation.
    pub message: String,
    /// Post-increment count that tripped the tier.
    pub count: u64,
    pub limit: u64,
}

impl Denial {
    /// Whole seconds until `reset_at`, rounded up, never below one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let remaining = self.reset_at.signed_duration_since(now);
        let millis = remaining.num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Outcome of [`RateLimitCoordinator::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed,
    Denied(Denial),
}

impl AdmissionDecision {
    pub fn allowed() -> Self {
        AdmissionDecision::Allowed
    }

    pub fn denied(denial: Denial) -> Self {
        AdmissionDecision::Denied(denial)
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allowed)
    }

    pub fn violated_tier(&self) -> Option<&TierId> {
        match self {
            AdmissionDecision::Denied(d) => Some(&d.tier),
            AdmissionDecision::Allowed => None,
        }
    }

    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AdmissionDecision::Denied(d) => Some(d.reset_at),
            AdmissionDecision::Allowed => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            AdmissionDecision::Denied(d) => Some(&d.message),
            AdmissionDecision::Allowed => None,
        }
    }

    /// Seconds a denied caller should wait, as of `now`.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<u64> {
        match self {
            AdmissionDecision::Denied(d) => Some(d.retry_after_secs(now)),
            AdmissionDecision::Allowed => None,
        }
    }
}

/// Evaluates tiers for a caller. Immutable after construction; share it behind an `Arc`.
#[derive(Clone)]
pub struct RateLimitCoordinator<S = NullSink> {
    store: Arc<dyn CounterStore>,
    tiers: Arc<[RateLimitTier]>,
    store_timeout: Duration,
    sink: S,
}

impl<S> std::fmt::Debug for RateLimitCoordinator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitCoordinator")
            .field("store", &self.store)
            .field("tiers", &self.tiers)
            .field("store_timeout", &self.store_timeout)
            .field("sink", &"<sink>")
            .finish()
    }
}

impl RateLimitCoordinator<NullSink> {
    /// Build a coordinator over `tiers`, evaluated in the given order.
    pub fn new<St>(store: St, tiers: Vec<RateLimitTier>) -> Self
    where
        St: CounterStore + 'static,
    {
        Self {
            store: Arc::new(store),
            tiers: tiers.into(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            sink: NullSink,
        }
    }
}

impl<S> RateLimitCoordinator<S> {
    /// Route admission events to `sink`.
    pub fn with_sink<S2>(self, sink: S2) -> RateLimitCoordinator<S2>
    where
        S2: TelemetrySink,
    {
        RateLimitCoordinator {
            store: self.store,
            tiers: self.tiers,
            store_timeout: self.store_timeout,
            sink,
        }
    }

    /// Bound each store round trip. A zero duration keeps the current value.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.store_timeout = timeout;
        }
        self
    }

    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    pub fn tiers(&self) -> &[RateLimitTier] {
        &self.tiers
    }
}

impl<S> RateLimitCoordinator<S>
where
    S: TelemetrySink,
{
    /// Decide whether `caller` may proceed.
    ///
    /// Never fails: store errors degrade to admission.
    pub async fn admit(&self, caller: &CallerIdentity) -> AdmissionDecision {
        for tier in self.tiers.iter() {
            let key = tier.key_for(caller);
            let reading = match self.increment(&key, tier.window()).await {
                Ok(reading) => reading,
                Err(err) => {
                    tracing::warn!(
                        tier = %tier.id(),
                        key = %key,
                        error = %err,
                        "counter store unavailable; admitting without rate limiting"
                    );
                    self.emit(AdmissionEvent::FailOpen {
                        tier: tier.id().clone(),
                        error: err.to_string(),
                    })
                    .await;
                    return AdmissionDecision::allowed();
                }
            };

            tracing::debug!(
                tier = %tier.id(),
                count = reading.count,
                limit = tier.limit(),
                "tier checked"
            );

            if tier.is_violated_by(reading.count) {
                tracing::info!(
                    tier = %tier.id(),
                    caller = %caller,
                    reset_at = %reading.reset_at.to_rfc3339(),
                    "request denied by rate limit"
                );
                self.emit(AdmissionEvent::Denied {
                    tier: tier.id().clone(),
                    count: reading.count,
                    limit: tier.limit(),
                    reset_at: reading.reset_at,
                })
                .await;
                return AdmissionDecision::denied(Denial {
                    tier: tier.id().clone(),
                    reset_at: reading.reset_at,
                    message: tier.message().to_string(),
                    count: reading.count,
                    limit: tier.limit(),
                });
            }
        }

        self.emit(AdmissionEvent::Allowed { tiers_checked: self.tiers.len() }).await;
        AdmissionDecision::Allowed
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<CounterReading, StoreError> {
        match tokio::time::timeout(self.store_timeout, self.store.increment(key, window)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "no reply within {}ms",
                self.store_timeout.as_millis()
            ))),
        }
    }

    async fn emit(&self, event: AdmissionEvent) {
        emit_best_effort(self.sink.clone(), GatewayEvent::Admission(event)).await;
    }
}
