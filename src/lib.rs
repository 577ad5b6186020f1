#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # quotagate
//!
//! Admission control and resilient forwarding for a quota-limited generative AI upstream.
//!
//! ## Features
//!
//! - **Tiered rate limits** evaluated in order with short-circuit on the first violation
//! - **Fail-open admission** when the counter store is unreachable
//! - **Bounded retry** on upstream overload, with testable backoff
//! - **Closed failure classification** mapped once to stable client errors
//! - **Pluggable counter stores** (in-memory here, Redis in `quotagate-redis`)
//!
//! ## Quick Start
//!
//! ```rust
//! use quotagate::{presets, CallerIdentity, InMemoryCounterStore, RateLimitCoordinator};
//!
//! #[tokio::main]
//! async fn main() {
//!     let tiers = presets::reference_tiers(1_000, 30, 2).unwrap();
//!     let coordinator = RateLimitCoordinator::new(InMemoryCounterStore::new(), tiers);
//!     let caller = CallerIdentity::new(Some("198.51.100.4"));
//!
//!     assert!(coordinator.admit(&caller).await.is_allowed());
//!     assert!(coordinator.admit(&caller).await.is_allowed());
//!     let third = coordinator.admit(&caller).await;
//!     assert_eq!(third.violated_tier().map(|t| t.as_str()), Some("user_limit"));
//! }
//! ```

pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod handler;
pub mod outcome;
pub mod prelude;
pub mod presets;
pub mod rate_limit;
pub mod retry;
pub mod server;
pub mod sleeper;
pub mod store;
pub mod telemetry;
pub mod tier;
pub mod upstream;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, GatewayConfig};
pub use error::GatewayError;
pub use handler::{Gateway, GatewayResponse, GatewaySettings};
pub use outcome::{classify, CallOutcome, FailureClass, FatalFailure};
pub use rate_limit::{AdmissionDecision, Denial, RateLimitCoordinator};
pub use retry::{ResilientCaller, RetrySettings};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use store::{CounterReading, CounterStore, InMemoryCounterStore, StoreError};
pub use tier::{CallerIdentity, KeyRule, RateLimitTier, TierError, TierId};
pub use upstream::{UpstreamClient, UpstreamFailure, UpstreamReply, UpstreamRequest};
