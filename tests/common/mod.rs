#![allow(dead_code)]

use async_trait::async_trait;
use quotagate::store::{CounterReading, CounterStore, StoreError};
use quotagate::upstream::{UpstreamClient, UpstreamFailure, UpstreamReply, UpstreamRequest};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upstream that replays a fixed script and records every request it sees.
#[derive(Debug, Clone, Default)]
pub struct ScriptedUpstream {
    script: Arc<Mutex<VecDeque<Result<UpstreamReply, UpstreamFailure>>>>,
    seen: Arc<Mutex<Vec<UpstreamRequest>>>,
}

impl ScriptedUpstream {
    pub fn new(script: Vec<Result<UpstreamReply, UpstreamFailure>>) -> Self {
        Self { script: Arc::new(Mutex::new(script.into())), seen: Arc::default() }
    }

    /// Echoes every message back.
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamReply, UpstreamFailure> {
        self.seen.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(UpstreamReply::Text(format!("echo: {}", request.message))))
    }
}

pub fn overloaded() -> Result<UpstreamReply, UpstreamFailure> {
    Err(UpstreamFailure::provider(503, Some("UNAVAILABLE".into()), "The model is overloaded."))
}

pub fn quota_exhausted() -> Result<UpstreamReply, UpstreamFailure> {
    Err(UpstreamFailure::provider(429, Some("RESOURCE_EXHAUSTED".into()), "Quota exceeded."))
}

/// Store whose every call fails, counting attempts.
#[derive(Debug, Clone, Default)]
pub struct DownStore {
    calls: Arc<AtomicUsize>,
}

impl DownStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for DownStore {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<CounterReading, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

/// Wraps a store and counts increments.
#[derive(Debug, Clone)]
pub struct CountingStore<S> {
    inner: S,
    calls: Arc<AtomicUsize>,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, calls: Arc::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S> CounterStore for CountingStore<S>
where
    S: CounterStore,
{
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterReading, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.increment(key, window).await
    }
}
