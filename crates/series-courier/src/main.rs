//! Series Courier - cached series delivery service
//!
//! Accepts delivery requests over HTTP, serves episodes from a disk cache or
//! fetches them from the content provider, and pushes them to recipients
//! through the messaging gateway one delivery per recipient at a time.

mod error;
mod provider;
mod resolver;
mod server;
mod transport;
mod types;

use crate::error::{CourierError, Result};
use crate::provider::HttpContentProvider;
use crate::resolver::CollectionMap;
use crate::server::{start_server, ServerState, SharedState};
use crate::transport::WebhookTransport;
use crate::types::CourierConfig;
use content_cache::{CacheConfig, ContentCache};
use delivery_coordinator::{CoordinatorConfig, DeliveryCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter =
        EnvFilter::from_default_env().add_directive("series_courier=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Series Courier...");

    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Cache dir: {:?}", config.cache_dir);
    info!(
        "Max cache size: {} MB",
        config.max_cache_size / (1024 * 1024)
    );
    info!("Cache max age: {} seconds", config.cache_max_age_secs);
    info!("Provider: {}", config.provider_url);
    info!("Gateway: {}", config.transport_url);

    let cache_config = CacheConfig::new(config.cache_dir.clone())
        .with_max_cache_size(config.max_cache_size)
        .with_max_age(Duration::from_secs(config.cache_max_age_secs));
    let cache = Arc::new(ContentCache::open(cache_config).await?);

    let coordinator_config = CoordinatorConfig {
        step_timeout: Duration::from_secs(config.step_timeout_secs),
        scratch_dir: config.scratch_dir.clone(),
    };
    coordinator_config.validate().map_err(CourierError::Config)?;

    let resolver = CollectionMap::load(&config.collections_file).await?;
    let coordinator = Arc::new(DeliveryCoordinator::new(
        cache.clone(),
        Arc::new(HttpContentProvider::new(&config.provider_url)),
        Arc::new(WebhookTransport::new(&config.transport_url)),
        Arc::new(resolver),
        coordinator_config,
    ));

    // Age-based eviction must not depend on new inserts arriving
    let sweep_cache = cache.clone();
    let sweep_every = Duration::from_secs(config.eviction_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = interval(sweep_every);
        loop {
            ticker.tick().await;
            let removed = sweep_cache.run_eviction().await;
            debug!(removed = removed.len(), "Eviction sweep finished");
        }
    });

    let state: SharedState = Arc::new(ServerState::new(coordinator));

    // Start HTTP server (blocking)
    start_server(state, config.port)
        .await
        .map_err(|e| CourierError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

fn load_config() -> Result<CourierConfig> {
    let defaults = CourierConfig::default();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(defaults.port);

    let cache_dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.cache_dir);

    let max_cache_size = env_u64("MAX_CACHE_SIZE", defaults.max_cache_size);
    let cache_max_age_secs = env_u64("CACHE_MAX_AGE_SECS", defaults.cache_max_age_secs);
    let eviction_interval_secs = env_u64("EVICTION_INTERVAL_SECS", defaults.eviction_interval_secs);
    let step_timeout_secs = env_u64("STEP_TIMEOUT_SECS", defaults.step_timeout_secs);

    let scratch_dir = std::env::var("SCRATCH_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.scratch_dir);

    let provider_url = std::env::var("PROVIDER_URL").unwrap_or(defaults.provider_url);
    let transport_url = std::env::var("TRANSPORT_URL").unwrap_or(defaults.transport_url);

    let collections_file = std::env::var("COLLECTIONS_FILE")
        .map(PathBuf::from)
        .unwrap_or(defaults.collections_file);

    Ok(CourierConfig {
        port,
        cache_dir,
        max_cache_size,
        cache_max_age_secs,
        eviction_interval_secs,
        step_timeout_secs,
        scratch_dir,
        provider_url,
        transport_url,
        collections_file,
    })
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}
