//! Redis counter store for `quotagate` (companion crate).
//!
//! Counters live under `<prefix>:<key>`. Each increment runs one Lua script, so the
//! increment and the first-hit expiry are a single atomic step on the server and concurrent
//! gateway instances never lose a count.
//!
//! ```rust,no_run
//! use quotagate::{presets, RateLimitCoordinator};
//! use quotagate_redis::RedisCounterStore;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisCounterStore::connect("redis://127.0.0.1/").await?;
//! let coordinator = RateLimitCoordinator::new(store, presets::reference_tiers(1_000, 30, 50)?);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotagate::clock::{Clock, SystemClock};
use quotagate::store::{CounterReading, CounterStore, StoreError};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, Script};
use std::sync::Arc;
use std::time::Duration;

/// INCR, arm the expiry on the first hit, report the remaining TTL.
///
/// A key that somehow lost its TTL (e.g. a manual `SET`) is re-armed instead of living forever.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Configuration for [`RedisCounterStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStoreConfig {
    /// Prepended to every counter key as `<prefix>:`. Empty means no prefix.
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self { key_prefix: "quotagate".to_string() }
    }
}

/// Shared, durable counter store.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    script: Arc<Script>,
    config: RedisStoreConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("config", &self.config)
            .field("connection", &"<redis::aio::ConnectionManager>")
            .finish()
    }
}

impl RedisCounterStore {
    /// Connect with the default key prefix.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    pub async fn connect_with_config(url: &str, config: RedisStoreConfig) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self::from_manager(connection, config))
    }

    /// Bring your own connection manager.
    pub fn from_manager(connection: ConnectionManager, config: RedisStoreConfig) -> Self {
        Self {
            connection,
            script: Arc::new(Script::new(INCREMENT_SCRIPT)),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock used to turn the remaining TTL into an absolute reset time.
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    fn key(&self, key: &str) -> String {
        prefixed(&self.config.key_prefix, key)
    }
}

fn prefixed(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}:{}", prefix, key)
    }
}

fn window_millis(window: Duration) -> Result<u64, StoreError> {
    let millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 {
        return Err(StoreError::ZeroWindow);
    }
    Ok(millis)
}

/// A negative TTL (key already gone) reads as "resets now".
fn reset_at(clock: &dyn Clock, ttl_ms: i64) -> DateTime<Utc> {
    clock.now() + chrono::Duration::milliseconds(ttl_ms.max(0))
}

fn map_error(err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Protocol(err.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterReading, StoreError> {
        let window_ms = window_millis(window)?;
        let full_key = self.key(key);
        let mut connection = self.connection.clone();

        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(&full_key)
            .arg(window_ms)
            .invoke_async(&mut connection)
            .await
            .map_err(|e| {
                tracing::warn!(target: "quotagate::redis", key = %full_key, error = %e, "increment failed");
                map_error(e)
            })?;

        let count = u64::try_from(count)
            .map_err(|_| StoreError::Protocol(format!("negative count {} for {}", count, full_key)))?;
        Ok(CounterReading { count, reset_at: reset_at(self.clock.as_ref(), ttl_ms) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotagate::clock::ManualClock;
    use std::io;

    #[test]
    fn connection_failures_are_unavailable() {
        for kind in [io::ErrorKind::ConnectionRefused, io::ErrorKind::ConnectionReset, io::ErrorKind::TimedOut] {
            let err = RedisError::from(io::Error::new(kind, "socket"));
            assert!(matches!(map_error(err), StoreError::Unavailable(_)), "{:?}", kind);
        }
    }

    #[test]
    fn unexpected_replies_are_protocol_errors() {
        let err = RedisError::from((redis::ErrorKind::TypeError, "response was of incompatible type"));
        assert!(matches!(map_error(err), StoreError::Protocol(_)));

        let err = RedisError::from((redis::ErrorKind::ResponseError, "NOSCRIPT"));
        assert!(matches!(map_error(err), StoreError::Protocol(_)));
    }

    #[test]
    fn reset_time_follows_injected_clock() {
        let clock = ManualClock::default();
        let now = clock.now();
        assert_eq!(reset_at(&clock, 1_500), now + chrono::Duration::milliseconds(1_500));
        assert_eq!(reset_at(&clock, -2), now);
    }

    #[test]
    fn keys_are_prefixed() {
        assert_eq!(prefixed("quotagate", "user_limit:1.2.3.4"), "quotagate:user_limit:1.2.3.4");
        assert_eq!(prefixed("", "global_limit"), "global_limit");
    }

    #[test]
    fn zero_window_is_rejected() {
        assert!(matches!(window_millis(Duration::ZERO), Err(StoreError::ZeroWindow)));
        assert_eq!(window_millis(Duration::from_secs(60)).unwrap(), 60_000);
    }
}
