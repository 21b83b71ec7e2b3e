//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata for one cached artifact inside a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEntry {
    pub size_bytes: u64,
    pub cached_at: DateTime<Utc>,
}

/// Metadata for one cached collection (e.g. a series)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    #[serde(default)]
    pub items: BTreeMap<String, ItemEntry>,
}

impl CollectionEntry {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            items: BTreeMap::new(),
        }
    }

    /// Record an access. Never moves `last_accessed_at` backwards, even if the
    /// wall clock does.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
        self.access_count = self.access_count.saturating_add(1);
    }

    pub fn size_bytes(&self) -> u64 {
        self.items.values().map(|item| item.size_bytes).sum()
    }
}

/// Statistics about the cache, computed from the index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_size: u64,
    pub total_items: usize,
    pub collection_count: usize,
    pub max_size: u64,
    pub usage_fraction: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cache_stats_default() {
        let stats = CacheStats::default();
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.total_items, 0);
        assert_eq!(stats.collection_count, 0);
        assert_eq!(stats.usage_fraction, 0.0);
    }

    #[test]
    fn test_touch_increments_and_never_goes_backwards() {
        let now = Utc::now();
        let mut entry = CollectionEntry::new(now);

        entry.touch(now + Duration::seconds(5));
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.last_accessed_at, now + Duration::seconds(5));

        entry.touch(now - Duration::seconds(30));
        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.last_accessed_at, now + Duration::seconds(5));
        assert!(entry.last_accessed_at >= entry.created_at);
    }

    #[test]
    fn test_collection_size_sums_items() {
        let now = Utc::now();
        let mut entry = CollectionEntry::new(now);
        entry.items.insert(
            "ep1".to_string(),
            ItemEntry {
                size_bytes: 100,
                cached_at: now,
            },
        );
        entry.items.insert(
            "ep2".to_string(),
            ItemEntry {
                size_bytes: 250,
                cached_at: now,
            },
        );
        assert_eq!(entry.size_bytes(), 350);
    }

    #[test]
    fn test_collection_entry_serialization() {
        let now = Utc::now();
        let mut entry = CollectionEntry::new(now);
        entry.items.insert(
            "ep1".to_string(),
            ItemEntry {
                size_bytes: 12345,
                cached_at: now,
            },
        );

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("12345"));
        assert!(json.contains("last_accessed_at"));

        let deserialized: CollectionEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, entry);
    }
}
