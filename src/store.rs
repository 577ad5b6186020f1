//! Counter store: the only shared mutable state behind admission control.
//!
//! The gateway never reads or writes counters directly. It asks the store to atomically
//! increment a named counter within a fixed window and gets back the post-increment count
//! plus the instant the window resets. Any backend (in-memory, Redis, ...) implements
//! [`CounterStore`].
//!
//! Invariant every implementation must uphold: concurrent increments of one key never lose an
//! update, and the first increment at or after `reset_at` starts a fresh window atomically with
//! the increment itself.

use crate::clock::{Clock, SystemClock};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result of one atomic increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterReading {
    /// Count after this increment (always >= 1).
    pub count: u64,
    /// When the current window ends.
    pub reset_at: DateTime<Utc>,
}

/// Failures reaching or operating the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter store returned an unexpected reply: {0}")]
    Protocol(String),
    #[error("counter store lock poisoned")]
    Poisoned,
    #[error("window must be greater than zero")]
    ZeroWindow,
}

/// Abstract storage interface for windowed counters.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Atomically increment `key` within a window of length `window`.
    ///
    /// Every call increments; there is no idempotency key.
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterReading, StoreError>;
}

#[async_trait]
impl<T> CounterStore for Arc<T>
where
    T: CounterStore + ?Sized,
{
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterReading, StoreError> {
        (**self).increment(key, window).await
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u64,
    reset_at: DateTime<Utc>,
}

/// Process-local counter store.
///
/// Not durable and not shared: counters reset when the process restarts and every instance
/// keeps its own view. Use it for tests, local development, or a single-instance deployment;
/// use a shared backend such as `quotagate-redis` anywhere else.
#[derive(Debug, Clone)]
pub struct InMemoryCounterStore {
    // key -> (count, window reset)
    data: Arc<Mutex<HashMap<String, WindowState>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock<C>(clock: C) -> Self
    where
        C: Clock + 'static,
    {
        Self { data: Arc::new(Mutex::new(HashMap::new())), clock: Arc::new(clock) }
    }

    /// Drop windows that have already ended. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut guard = self.data.lock().map_err(|_| StoreError::Poisoned)?;
        let before = guard.len();
        guard.retain(|_, state| state.reset_at > now);
        Ok(before - guard.len())
    }

    /// Number of live keys, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.data.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterReading, StoreError> {
        if window.is_zero() {
            return Err(StoreError::ZeroWindow);
        }
        let window = chrono::Duration::from_std(window)
            .map_err(|e| StoreError::Protocol(format!("window out of range: {e}")))?;
        let now = self.clock.now();

        // Read, reset and increment happen under one lock, so two callers can never both
        // observe an expired window and both start a new one.
        let mut guard = self.data.lock().map_err(|_| StoreError::Poisoned)?;
        let state = guard
            .entry(key.to_string())
            .or_insert(WindowState { count: 0, reset_at: now + window });
        if now >= state.reset_at {
            *state = WindowState { count: 0, reset_at: now + window };
        }
        state.count = state.count.saturating_add(1);

        Ok(CounterReading { count: state.count, reset_at: state.reset_at })
    }
}
