use crate::error::{Result, StorageError};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_CACHE_SIZE: u64 = 1024 * 1024 * 1024; // 1GB
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60); // 7 days

/// Configuration for a [`ContentCache`](crate::ContentCache)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache root; holds one directory per collection plus `index.json`
    pub root: PathBuf,
    /// Capacity in bytes before LRU eviction kicks in
    pub max_cache_size: u64,
    /// Collections older than this (measured from creation) are evicted
    pub max_age: Duration,
}

impl CacheConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_max_cache_size(mut self, bytes: u64) -> Self {
        self.max_cache_size = bytes;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cache_size == 0 {
            return Err(StorageError::Config(
                "max_cache_size must be non-zero".to_string(),
            ));
        }
        if self.max_age.is_zero() {
            return Err(StorageError::Config("max_age must be non-zero".to_string()));
        }
        if chrono::Duration::from_std(self.max_age).is_err() {
            return Err(StorageError::Config("max_age is out of range".to_string()));
        }
        if self.root.as_os_str().is_empty() {
            return Err(StorageError::Config("cache root must be set".to_string()));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("series-courier").join("cache"),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}
