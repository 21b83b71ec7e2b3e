//! Disk-backed collection cache with age expiry and LRU eviction
//!
//! Artifacts are stored on disk grouped into collections, one directory per
//! collection. A JSON index at the cache root tracks sizes and access times
//! and is the single source of truth for what the cache holds.

mod cache;
mod config;
mod error;
mod index;
mod types;

pub use cache::ContentCache;
pub use config::CacheConfig;
pub use error::{Result, StorageError};
pub use index::CacheIndex;
pub use types::{CacheStats, CollectionEntry, ItemEntry};
