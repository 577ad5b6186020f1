//! Process configuration.
//!
//! Sources, later overriding earlier:
//! 1. Bundled defaults (`quotagate.toml` compiled into the binary)
//! 2. `./quotagate.toml`, if present
//! 3. `QUOTAGATE__SECTION__KEY` environment variables
//!
//! ```rust
//! use quotagate::config::GatewayConfig;
//!
//! let config = GatewayConfig::from_toml_str("[limits]\nper_minute = 5").unwrap();
//! assert_eq!(config.limits.per_minute, 5);
//! assert_eq!(config.retry().max_attempts(), 3);
//! ```

use crate::backoff::BackoffKind;
use crate::presets;
use crate::retry::RetrySettings;
use crate::tier::{KeyRule, RateLimitTier, TierError};
use crate::upstream::GeminiConfig;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("../quotagate.toml");

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid tier: {0}")]
    Tier(#[from] TierError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub environment: String,
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
    pub retry: RetryConfig,
    pub upstream: UpstreamConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    /// Value of `Access-Control-Allow-Origin`.
    pub allowed_origin: String,
    /// Key callers by the last `X-Forwarded-For` hop instead of the peer address.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub global_daily: u64,
    pub per_minute: u64,
    pub per_caller_daily: u64,
    pub max_message_chars: usize,
    pub max_history_turns: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierScope {
    Global,
    PerCaller,
}

/// An explicitly configured tier.
#[derive(Debug, Clone, Deserialize)]
pub struct TierConfig {
    pub id: String,
    pub limit: u64,
    pub window_secs: u64,
    pub scope: TierScope,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub backoff: BackoffKind,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Allow an empty key. Only meant for local runs against a stub.
    #[serde(default)]
    pub allow_missing_key: bool,
    pub chat_model: String,
    pub speech_model: String,
    pub voice: String,
    pub timeout_secs: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub key_prefix: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl GatewayConfig {
    fn defaults() -> ConfigBuilder<config::builder::DefaultState> {
        Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// Bundled defaults, then `./quotagate.toml`, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::defaults()
            .add_source(File::with_name("quotagate").required(false))
            .add_source(
                Environment::with_prefix("QUOTAGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Bundled defaults overridden by the file at `path`. The environment is not consulted.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::defaults()
            .add_source(File::from(path.as_ref()).format(FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Bundled defaults overridden by an inline TOML document.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config = Self::defaults()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("upstream.endpoint must not be empty".into()));
        }
        if self.upstream.api_key.trim().is_empty() && !self.upstream.allow_missing_key {
            return Err(ConfigError::Invalid(
                "upstream.api_key is empty (set QUOTAGATE__UPSTREAM__API_KEY)".into(),
            ));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ConfigError::Invalid("upstream.timeout_secs must be > 0".into()));
        }
        if self.limits.max_message_chars == 0 {
            return Err(ConfigError::Invalid("limits.max_message_chars must be > 0".into()));
        }
        if self.store.timeout_ms == 0 {
            return Err(ConfigError::Invalid("store.timeout_ms must be > 0".into()));
        }
        if self.store.backend == StoreBackend::Redis
            && self.store.redis_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::Invalid("store.redis_url is required for the redis backend".into()));
        }
        self.tiers()?;
        Ok(())
    }

    /// Tiers in evaluation order. Explicit `[[tiers]]` win over the `[limits]` reference set.
    pub fn tiers(&self) -> Result<Vec<RateLimitTier>, ConfigError> {
        if self.tiers.is_empty() {
            return Ok(presets::reference_tiers(
                self.limits.global_daily,
                self.limits.per_minute,
                self.limits.per_caller_daily,
            )?);
        }
        self.tiers
            .iter()
            .map(|t| {
                let rule = match t.scope {
                    TierScope::Global => KeyRule::Global,
                    TierScope::PerCaller => KeyRule::PerCaller,
                };
                let tier =
                    RateLimitTier::new(t.id.as_str(), t.limit, Duration::from_secs(t.window_secs), rule)?;
                Ok(match &t.message {
                    Some(message) => tier.with_message(message.clone()),
                    None => tier,
                })
            })
            .collect()
    }

    pub fn retry(&self) -> RetrySettings {
        RetrySettings::new(
            self.retry.max_retries,
            self.retry.backoff.with_base(Duration::from_millis(self.retry.base_delay_ms)),
        )
    }

    pub fn gemini(&self) -> GeminiConfig {
        GeminiConfig {
            endpoint: self.upstream.endpoint.clone(),
            api_key: self.upstream.api_key.clone(),
            chat_model: self.upstream.chat_model.clone(),
            speech_model: self.upstream.speech_model.clone(),
            voice: self.upstream.voice.clone(),
            timeout: Duration::from_secs(self.upstream.timeout_secs),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store.timeout_ms)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
