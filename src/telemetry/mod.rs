//! Telemetry and observability for the gateway pipeline.
//!
//! Admission, retry and upstream stages emit structured [`GatewayEvent`]s. Events flow
//! through `TelemetrySink` implementations which can log, aggregate, or forward them.
//!
//! # Event Types
//!
//! - **Admission**: `Allowed`, `Denied`, `FailOpen`
//! - **Retry**: `Attempt`, `Exhausted`
//! - **Upstream**: `Success`, `Failure`
//!
//! A counter store outage is never surfaced to clients; `Admission::FailOpen` (and the
//! accompanying `warn!` log) is the only trace it leaves.
//!
//! # Telemetry Sinks
//!
//! The `TelemetrySink` trait defines how events are consumed. It's implemented
//! as a `tower::Service<GatewayEvent>` for composability.

pub mod events;
pub mod sinks;

pub use events::{AdmissionEvent, GatewayEvent, RetryEvent, UpstreamOutcome};
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};
