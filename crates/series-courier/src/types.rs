//! Core types for the series courier

use content_cache::CacheStats;
use serde::Serialize;
use std::path::PathBuf;

/// Configuration for the courier service
#[derive(Debug, Clone)]
pub struct CourierConfig {
    pub port: u16,
    pub cache_dir: PathBuf,
    pub max_cache_size: u64,
    pub cache_max_age_secs: u64,
    pub eviction_interval_secs: u64,
    pub step_timeout_secs: u64,
    pub scratch_dir: PathBuf,
    pub provider_url: String,
    pub transport_url: String,
    pub collections_file: PathBuf,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            port: 3005,
            cache_dir: PathBuf::from("./cache/series"),
            max_cache_size: 1024 * 1024 * 1024, // 1GB
            cache_max_age_secs: 7 * 24 * 60 * 60, // 7 days
            eviction_interval_secs: 10 * 60,
            step_timeout_secs: 5 * 60,
            scratch_dir: PathBuf::from("./cache/scratch"),
            provider_url: "http://localhost:3006".to_string(),
            transport_url: "http://localhost:3007".to_string(),
            collections_file: PathBuf::from("./collections.json"),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub active_deliveries: usize,
    pub cache: CacheStats,
}

/// Response for delivery requests and status lookups
#[derive(Debug, Serialize)]
pub struct DeliveryStatusResponse {
    pub recipient: String,
    pub active_collection: Option<String>,
}
