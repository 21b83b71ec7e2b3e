//! Disk-backed collection storage with a persisted index

use crate::config::CacheConfig;
use crate::error::{Result, StorageError};
use crate::index::{CacheIndex, INDEX_FILE};
use crate::types::{CacheStats, CollectionEntry, ItemEntry};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const STAGING_DIR: &str = ".staging";

/// Share of `max_cache_size` that size-based eviction trims down to
const EVICTION_TARGET_PERCENT: u64 = 80;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// A cache of binary artifacts grouped into collections.
///
/// Layout under the root: `<collection>/<item>` for artifacts, `index.json`
/// for metadata and `.staging/` for copies in progress. Every index mutation
/// happens under a single mutex and is persisted before the lock is released.
pub struct ContentCache {
    root: PathBuf,
    staging_dir: PathBuf,
    index_path: PathBuf,
    max_cache_size: u64,
    max_age: chrono::Duration,
    index: Mutex<CacheIndex>,
}

impl ContentCache {
    /// Open (or create) a cache at `config.root`.
    ///
    /// Loads the index fail-open, clears leftover staging files, reconciles
    /// the index against what is actually on disk and runs one eviction pass.
    pub async fn open(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let max_age = chrono::Duration::from_std(config.max_age)
            .map_err(|_| StorageError::Config("max_age is out of range".to_string()))?;

        let root = config.root;
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::io(&root, e))?;

        let staging_dir = root.join(STAGING_DIR);
        match fs::remove_dir_all(&staging_dir).await {
            Ok(()) => debug!(path = ?staging_dir, "Cleared staging area"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?staging_dir, error = %e, "Failed to clear staging area"),
        }
        fs::create_dir_all(&staging_dir)
            .await
            .map_err(|e| StorageError::io(&staging_dir, e))?;

        let index_path = root.join(INDEX_FILE);
        let mut index = CacheIndex::load(&index_path).await;
        reconcile(&root, &mut index).await;

        let cache = Self {
            root,
            staging_dir,
            index_path,
            max_cache_size: config.max_cache_size,
            max_age,
            index: Mutex::new(index),
        };

        {
            let mut index = cache.index.lock().await;
            cache.evict_locked(&mut index, Utc::now()).await;
            cache.persist_locked(&index).await;
            info!(
                root = ?cache.root,
                collections = index.collections.len(),
                total_size = index.total_size(),
                max_cache_size = cache.max_cache_size,
                "Content cache opened"
            );
        }

        Ok(cache)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the artifact exists on disk. Does not count as an access.
    pub async fn has_item(&self, collection_id: &str, item_id: &str) -> bool {
        let Ok((collection, item)) = keys(collection_id, item_id) else {
            return false;
        };
        is_file(&self.item_path(&collection, &item)).await
    }

    /// Whether every id in `item_ids` is cached under `collection_id`.
    /// Vacuously true for an empty id list.
    pub async fn has_collection<I, S>(&self, collection_id: &str, item_ids: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for item_id in item_ids {
            if !self.has_item(collection_id, item_id.as_ref()).await {
                return false;
            }
        }
        true
    }

    /// Look up an artifact, recording the access on its collection.
    ///
    /// Returns `None` on a miss. An indexed item whose file has disappeared is
    /// dropped from the index and reported as a miss.
    pub async fn get_item(&self, collection_id: &str, item_id: &str) -> Option<PathBuf> {
        let (collection, item) = keys(collection_id, item_id).ok()?;
        let path = self.item_path(&collection, &item);

        let mut index = self.index.lock().await;
        if !is_file(&path).await {
            debug!(collection = %collection, item = %item, "Cache miss");
            if self.forget_locked(&mut index, &collection, &item).await {
                warn!(collection = %collection, item = %item, "Indexed artifact missing on disk, dropped from index");
                self.persist_locked(&index).await;
            }
            return None;
        }

        if let Some(entry) = index.collections.get_mut(&collection) {
            entry.touch(Utc::now());
            self.persist_locked(&index).await;
        }
        debug!(collection = %collection, item = %item, "Cache hit");
        Some(path)
    }

    /// Copy `source` into the cache and index it, then run eviction.
    ///
    /// The copy lands in the staging area first and is renamed into place, so
    /// readers never observe a partial artifact. The index is untouched if any
    /// filesystem step fails.
    pub async fn put_item(
        &self,
        collection_id: &str,
        item_id: &str,
        source: &Path,
    ) -> Result<PathBuf> {
        let (collection, item) = keys(collection_id, item_id)?;

        let staged = self.staging_dir.join(format!(
            "{}-{}.partial",
            std::process::id(),
            STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = fs::copy(source, &staged).await {
            let _ = fs::remove_file(&staged).await;
            return Err(StorageError::io(source, e));
        }
        let size_bytes = match fs::metadata(&staged).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                let _ = fs::remove_file(&staged).await;
                return Err(StorageError::io(&staged, e));
            }
        };

        let mut index = self.index.lock().await;

        let dir = self.root.join(&collection);
        let dest = dir.join(&item);
        if let Err(e) = fs::create_dir_all(&dir).await {
            let _ = fs::remove_file(&staged).await;
            return Err(StorageError::io(&dir, e));
        }
        if let Err(e) = fs::rename(&staged, &dest).await {
            let _ = fs::remove_file(&staged).await;
            return Err(StorageError::io(&dest, e));
        }

        let now = Utc::now();
        let entry = index
            .collections
            .entry(collection.clone())
            .or_insert_with(|| {
                info!(collection = %collection, "Caching new collection");
                CollectionEntry::new(now)
            });
        entry.items.insert(
            item.clone(),
            ItemEntry {
                size_bytes,
                cached_at: now,
            },
        );
        entry.touch(now);
        debug!(collection = %collection, item = %item, size_bytes, "Cached item");

        self.evict_locked(&mut index, now).await;
        self.persist_locked(&index).await;

        Ok(dest)
    }

    /// Delete a collection's directory and index entry. Removing an unknown
    /// collection is a no-op.
    pub async fn remove_collection(&self, collection_id: &str) -> Result<()> {
        let collection = collection_key(collection_id)?;
        let mut index = self.index.lock().await;
        if self.remove_locked(&mut index, &collection).await? {
            info!(collection = %collection, "Removed collection");
            self.persist_locked(&index).await;
        }
        Ok(())
    }

    /// Remove every collection
    pub async fn clear(&self) -> Result<()> {
        let mut index = self.index.lock().await;
        let keys: Vec<String> = index.collections.keys().cloned().collect();
        let mut result = Ok(());
        for key in keys {
            if let Err(e) = self.remove_locked(&mut index, &key).await {
                warn!(collection = %key, error = %e, "Failed to remove collection");
                result = Err(e);
            }
        }
        self.persist_locked(&index).await;
        result
    }

    /// Age-based then size-based eviction. Returns the removed collection ids.
    pub async fn run_eviction(&self) -> Vec<String> {
        let mut index = self.index.lock().await;
        let removed = self.evict_locked(&mut index, Utc::now()).await;
        if !removed.is_empty() {
            self.persist_locked(&index).await;
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.lock().await;
        let total_size = index.total_size();
        CacheStats {
            total_size,
            total_items: index.total_items(),
            collection_count: index.collections.len(),
            max_size: self.max_cache_size,
            usage_fraction: total_size as f64 / self.max_cache_size as f64,
        }
    }

    /// Snapshot of the index
    pub async fn collections(&self) -> BTreeMap<String, CollectionEntry> {
        self.index.lock().await.collections.clone()
    }

    fn item_path(&self, collection: &str, item: &str) -> PathBuf {
        self.root.join(collection).join(item)
    }

    /// Stale collections go first so the LRU pass only weighs what would
    /// otherwise survive.
    async fn evict_locked(&self, index: &mut CacheIndex, now: DateTime<Utc>) -> Vec<String> {
        let mut removed = Vec::new();

        let expired: Vec<String> = index
            .collections
            .iter()
            .filter(|(_, entry)| now - entry.created_at > self.max_age)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            match self.remove_locked(index, &key).await {
                Ok(_) => {
                    info!(collection = %key, "Evicted expired collection");
                    removed.push(key);
                }
                Err(e) => warn!(collection = %key, error = %e, "Failed to evict expired collection"),
            }
        }

        let mut total = index.total_size();
        if total <= self.max_cache_size {
            return removed;
        }

        let target = (self.max_cache_size as u128 * EVICTION_TARGET_PERCENT as u128 / 100) as u64;
        let mut candidates: Vec<(DateTime<Utc>, String, u64)> = index
            .collections
            .iter()
            .map(|(key, entry)| (entry.last_accessed_at, key.clone(), entry.size_bytes()))
            .collect();
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        for (_, key, size) in candidates {
            if total <= target {
                break;
            }
            match self.remove_locked(index, &key).await {
                Ok(_) => {
                    total = total.saturating_sub(size);
                    info!(collection = %key, size_bytes = size, total, target, "Evicted least recently used collection");
                    removed.push(key);
                }
                Err(e) => warn!(collection = %key, error = %e, "Failed to evict collection"),
            }
        }

        removed
    }

    /// Directory and index entry go together; the entry stays if the delete
    /// fails.
    async fn remove_locked(&self, index: &mut CacheIndex, collection: &str) -> Result<bool> {
        let dir = self.root.join(collection);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(&dir, e)),
        }
        Ok(index.collections.remove(collection).is_some())
    }

    /// Drop one item from the index. A collection left without items goes
    /// away together with its directory.
    async fn forget_locked(&self, index: &mut CacheIndex, collection: &str, item: &str) -> bool {
        let Some(entry) = index.collections.get_mut(collection) else {
            return false;
        };
        let removed = entry.items.remove(item).is_some();
        if entry.items.is_empty() {
            if let Err(e) = self.remove_locked(index, collection).await {
                warn!(collection = %collection, error = %e, "Failed to remove emptied collection");
            }
        }
        removed
    }

    async fn persist_locked(&self, index: &CacheIndex) {
        if let Err(e) = index.persist(&self.index_path).await {
            warn!(error = %e, "Failed to persist cache index");
        }
    }
}

/// Drop index entries whose artifacts are gone, refresh sizes from disk and
/// delete collection directories the index does not know about.
async fn reconcile(root: &Path, index: &mut CacheIndex) {
    let mut dropped = Vec::new();

    for (key, entry) in index.collections.iter_mut() {
        if collection_key(key).ok().as_deref() != Some(key.as_str()) {
            dropped.push(key.clone());
            continue;
        }
        let dir = root.join(key);
        let mut missing = Vec::new();
        for (item, item_entry) in entry.items.iter_mut() {
            match fs::metadata(dir.join(item)).await {
                Ok(meta) if meta.is_file() && validate_component(item).is_ok() => {
                    item_entry.size_bytes = meta.len();
                }
                _ => missing.push(item.clone()),
            }
        }
        for item in missing {
            warn!(collection = %key, item = %item, "Indexed artifact missing on disk");
            entry.items.remove(&item);
        }
        if entry.items.is_empty() {
            dropped.push(key.clone());
        }
    }
    for key in dropped {
        index.collections.remove(&key);
    }

    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = ?root, error = %e, "Failed to scan cache root");
            return;
        }
    };
    while let Ok(Some(dir_entry)) = entries.next_entry().await {
        let is_dir = dir_entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        if name == STAGING_DIR || index.collections.contains_key(&name) {
            continue;
        }
        match fs::remove_dir_all(dir_entry.path()).await {
            Ok(()) => info!(collection = %name, "Removed unindexed collection directory"),
            Err(e) => warn!(collection = %name, error = %e, "Failed to remove unindexed directory"),
        }
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

fn keys(collection_id: &str, item_id: &str) -> Result<(String, String)> {
    let collection = collection_key(collection_id)?;
    validate_component(item_id)?;
    Ok((collection, item_id.to_string()))
}

/// Collection ids are case-insensitive; the lowercase form is the key.
///
/// Collection directories share the root with the index file and its
/// siblings, so those names are refused.
fn collection_key(collection_id: &str) -> Result<String> {
    let key = collection_id.trim().to_lowercase();
    validate_component(&key)?;
    if key == INDEX_FILE || key.starts_with(&format!("{INDEX_FILE}.")) {
        return Err(StorageError::InvalidKey(key));
    }
    Ok(key)
}

/// Ids become single path components under the cache root
fn validate_component(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\', '\0'])
        && id.len() <= 255;
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(id.to_string()))
    }
}
