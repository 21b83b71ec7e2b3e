//! Static collection id to group mapping loaded from a JSON file

use crate::error::{CourierError, Result};
use delivery_coordinator::{CollectionResolver, GroupRef};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// `{"breaking-bad": "-1001234", ...}`; ids match case-insensitively
#[derive(Debug, Default)]
pub struct CollectionMap {
    groups: HashMap<String, GroupRef>,
}

impl CollectionMap {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let groups = pairs
            .into_iter()
            .map(|(id, group)| (normalize(id.as_ref()), GroupRef(group.into())))
            .collect();
        Self { groups }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let raw: HashMap<String, String> = serde_json::from_slice(&bytes).map_err(|e| {
            CourierError::Config(format!("invalid collections file {:?}: {}", path, e))
        })?;
        let map = Self::from_pairs(raw);
        info!(path = ?path, collections = map.len(), "Loaded collection map");
        Ok(map)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }
}

fn normalize(id: &str) -> String {
    id.trim().to_lowercase()
}

impl CollectionResolver for CollectionMap {
    fn resolve(&self, collection_id: &str) -> Option<GroupRef> {
        self.groups.get(&normalize(collection_id)).cloned()
    }
}
