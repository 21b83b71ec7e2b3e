//! Persisted cache index
//!
//! The index is a single JSON document rewritten in full on every mutation.
//! Writes go to a sibling temp file which is renamed over the live file, so a
//! crash mid-write leaves either the old or the new index, never a truncated
//! one. Reads are fail-open: a missing or unparseable index loads as empty.

use crate::error::{Result, StorageError};
use crate::types::CollectionEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;

/// All collections known to the cache, keyed by normalized collection id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheIndex {
    version: u32,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionEntry>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            collections: BTreeMap::new(),
        }
    }
}

impl CacheIndex {
    /// Decode an index document, rejecting unknown format versions
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        let index: CacheIndex = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
        if index.version != INDEX_VERSION {
            return Err(format!(
                "unsupported index version {} (expected {})",
                index.version, INDEX_VERSION
            ));
        }
        Ok(index)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Load the index at `path`, falling back to an empty index if the file is
    /// missing or corrupt. A corrupt file is moved aside for inspection.
    pub async fn load(path: &Path) -> Self {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?path, "No cache index found, starting empty");
                return Self::default();
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Cache index unreadable, starting empty");
                return Self::default();
            }
        };

        match Self::decode(&bytes) {
            Ok(index) => {
                debug!(
                    path = ?path,
                    collections = index.collections.len(),
                    "Loaded cache index"
                );
                index
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Cache index corrupt, starting empty");
                let aside = sibling(path, ".corrupt");
                if let Err(e) = fs::rename(path, &aside).await {
                    debug!(path = ?aside, error = %e, "Could not move corrupt index aside");
                }
                Self::default()
            }
        }
    }

    /// Atomically replace the index file at `path` with this index
    pub async fn persist(&self, path: &Path) -> Result<()> {
        let bytes = self.encode()?;
        let tmp = sibling(path, ".tmp");

        let write = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            fs::rename(&tmp, path).await
        };

        if let Err(e) = write.await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::io(path, e));
        }
        Ok(())
    }

    pub fn total_size(&self) -> u64 {
        self.collections.values().map(|c| c.size_bytes()).sum()
    }

    pub fn total_items(&self) -> usize {
        self.collections.values().map(|c| c.items.len()).sum()
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
