//! `quotagate` binary: load config, pick a counter store, serve.

use quotagate::config::{GatewayConfig, StoreBackend};
use quotagate::server::{self, AppState};
use quotagate::store::{CounterStore, InMemoryCounterStore};
use quotagate::telemetry::LogSink;
use quotagate::upstream::GeminiClient;
use quotagate::{Gateway, GatewaySettings, RateLimitCoordinator, ResilientCaller};
use quotagate_redis::{RedisCounterStore, RedisStoreConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GatewayConfig::load()?;
    config.validate()?;

    let store = build_store(&config).await?;
    let coordinator = RateLimitCoordinator::new(store, config.tiers()?)
        .with_store_timeout(config.store_timeout())
        .with_sink(LogSink);
    let caller = ResilientCaller::new(config.retry()).with_sink(LogSink);
    let upstream = GeminiClient::new(config.gemini())?;
    let settings = GatewaySettings {
        max_message_chars: config.limits.max_message_chars,
        max_history_turns: config.limits.max_history_turns,
        system_prompt: config.upstream.system_prompt.clone(),
        expose_detail: !config.is_production(),
    };

    let gateway = Gateway::new(coordinator, caller, upstream, settings);
    let state = AppState::new(gateway, &config.server.allowed_origin)?
        .trust_forwarded_for(config.server.trust_forwarded_for);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        environment = %config.environment,
        store = ?config.store.backend,
        "quotagate listening"
    );
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn build_store(config: &GatewayConfig) -> Result<Arc<dyn CounterStore>, Box<dyn std::error::Error>> {
    match config.store.backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory counter store; limits are per process and reset on restart");
            let store = Arc::new(InMemoryCounterStore::new());
            spawn_purge(store.clone());
            Ok(store as Arc<dyn CounterStore>)
        }
        StoreBackend::Redis => {
            let url = config.store.redis_url.as_deref().ok_or("store.redis_url is required")?;
            let redis_config = RedisStoreConfig { key_prefix: config.store.key_prefix.clone() };
            let store = RedisCounterStore::connect_with_config(url, redis_config).await?;
            Ok(Arc::new(store) as Arc<dyn CounterStore>)
        }
    }
}

fn spawn_purge(store: Arc<InMemoryCounterStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            match store.purge_expired() {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "purged expired counters"),
                Err(err) => tracing::warn!(error = %err, "counter purge failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
