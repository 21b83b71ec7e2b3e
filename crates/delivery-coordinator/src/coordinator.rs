//! Fetch-and-deliver sequencing per recipient

use crate::collaborators::{
    CollectionResolver, ContentProvider, DeliveryTransport, GroupRef, Notice, ProviderItem,
};
use crate::error::{DeliveryError, Result};
use crate::locks::{RecipientGuard, RecipientLocks};
use content_cache::ContentCache;
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Upper bound for each provider call, fetch and delivery
    pub step_timeout: Duration,
    /// Parent directory for per-delivery scratch space holding fetched items
    pub scratch_dir: PathBuf,
}

impl CoordinatorConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.step_timeout.is_zero() {
            return Err("step_timeout must be non-zero".to_string());
        }
        if self.scratch_dir.as_os_str().is_empty() {
            return Err("scratch_dir must be set".to_string());
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            scratch_dir: std::env::temp_dir().join("series-courier").join("scratch"),
        }
    }
}

/// What happened to one item of a delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemStatus {
    Delivered { from_cache: bool },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub item_id: String,
    pub status: ItemStatus,
}

/// Summary of a finished delivery, items in delivery order
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub recipient: String,
    pub collection_id: String,
    pub fully_cached: bool,
    pub items: Vec<ItemOutcome>,
}

impl DeliveryReport {
    pub fn delivered(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Delivered { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.items.len() - self.delivered()
    }
}

/// Runs at most one delivery per recipient.
///
/// Construct one per process and share it by `Arc` with whatever dispatches
/// inbound requests.
pub struct DeliveryCoordinator {
    cache: Arc<ContentCache>,
    provider: Arc<dyn ContentProvider>,
    transport: Arc<dyn DeliveryTransport>,
    resolver: Arc<dyn CollectionResolver>,
    locks: RecipientLocks,
    config: CoordinatorConfig,
}

impl DeliveryCoordinator {
    pub fn new(
        cache: Arc<ContentCache>,
        provider: Arc<dyn ContentProvider>,
        transport: Arc<dyn DeliveryTransport>,
        resolver: Arc<dyn CollectionResolver>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            cache,
            provider,
            transport,
            resolver,
            locks: RecipientLocks::new(),
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Collection currently being delivered to `recipient`, if any
    pub fn active_collection(&self, recipient: &str) -> Option<String> {
        self.locks.active_collection(recipient)
    }

    pub fn active_count(&self) -> usize {
        self.locks.active_count()
    }

    /// Run a full delivery and wait for it.
    pub async fn deliver(&self, recipient: &str, collection_id: &str) -> Result<DeliveryReport> {
        let (guard, group) = match self.begin(recipient, collection_id) {
            Err(DeliveryError::NotFound(id)) => {
                self.notify(recipient, Notice::NotFound { collection_id: id.clone() })
                    .await;
                return Err(DeliveryError::NotFound(id));
            }
            claimed => claimed?,
        };
        self.run(guard, collection_id, group).await
    }

    /// Claim the recipient and resolve the collection, then run the delivery
    /// in the background.
    ///
    /// `Busy` and `NotFound` are returned here, before anything is spawned.
    /// The not-found notice is sent in the background so the caller never
    /// waits on the transport.
    pub async fn start(
        self: &Arc<Self>,
        recipient: &str,
        collection_id: &str,
    ) -> Result<JoinHandle<Result<DeliveryReport>>> {
        let (guard, group) = match self.begin(recipient, collection_id) {
            Err(DeliveryError::NotFound(id)) => {
                let this = Arc::clone(self);
                let recipient = recipient.to_string();
                let notice = Notice::NotFound {
                    collection_id: id.clone(),
                };
                tokio::spawn(async move { this.notify(&recipient, notice).await });
                return Err(DeliveryError::NotFound(id));
            }
            claimed => claimed?,
        };
        let this = Arc::clone(self);
        let collection_id = collection_id.to_string();
        Ok(tokio::spawn(async move {
            this.run(guard, &collection_id, group).await
        }))
    }

    /// An unknown collection releases the recipient before returning.
    fn begin(&self, recipient: &str, collection_id: &str) -> Result<(RecipientGuard, GroupRef)> {
        let guard = self.locks.acquire(recipient, collection_id).map_err(|e| {
            debug!(recipient, collection = collection_id, "Recipient busy");
            e
        })?;

        match self.resolver.resolve(collection_id) {
            Some(group) => Ok((guard, group)),
            None => {
                info!(recipient, collection = collection_id, "Unknown collection");
                Err(DeliveryError::NotFound(collection_id.to_string()))
            }
        }
    }

    /// The guard is held for the whole sequence and released on every exit.
    async fn run(
        &self,
        guard: RecipientGuard,
        collection_id: &str,
        group: GroupRef,
    ) -> Result<DeliveryReport> {
        let recipient = guard.recipient();

        let items = match self.bounded(self.provider.list_items(&group)).await {
            Ok(items) => items,
            Err(e) => {
                error!(recipient, collection = collection_id, group = %group, error = %e, "Failed to list collection");
                self.notify(
                    recipient,
                    Notice::Failed {
                        collection_id: collection_id.to_string(),
                    },
                )
                .await;
                return Err(e.into());
            }
        };

        if items.is_empty() {
            info!(recipient, collection = collection_id, "Collection has no items");
            self.notify(
                recipient,
                Notice::Empty {
                    collection_id: collection_id.to_string(),
                },
            )
            .await;
            return Err(DeliveryError::EmptyCollection(collection_id.to_string()));
        }

        let ids: Vec<String> = items.iter().map(|i| i.item_id.clone()).collect();
        let fully_cached = self.cache.has_collection(collection_id, ids).await;
        info!(
            recipient,
            collection = collection_id,
            total = items.len(),
            fully_cached,
            "Starting delivery"
        );
        self.notify(
            recipient,
            Notice::Started {
                collection_id: collection_id.to_string(),
                total: items.len(),
                fully_cached,
            },
        )
        .await;

        let mut scratch: Option<TempDir> = None;
        let mut outcomes = Vec::with_capacity(items.len());
        for item in &items {
            let status = self
                .process_item(recipient, collection_id, &group, item, &mut scratch)
                .await;
            if let ItemStatus::Skipped { reason } = &status {
                warn!(recipient, collection = collection_id, item = %item.item_id, reason = %reason, "Skipped item");
                self.notify(
                    recipient,
                    Notice::ItemSkipped {
                        collection_id: collection_id.to_string(),
                        item_id: item.item_id.clone(),
                        reason: reason.clone(),
                    },
                )
                .await;
            }
            outcomes.push(ItemOutcome {
                item_id: item.item_id.clone(),
                status,
            });
        }

        let report = DeliveryReport {
            recipient: recipient.to_string(),
            collection_id: collection_id.to_string(),
            fully_cached,
            items: outcomes,
        };
        info!(
            recipient,
            collection = collection_id,
            delivered = report.delivered(),
            skipped = report.skipped(),
            "Delivery complete"
        );
        self.notify(
            recipient,
            Notice::Completed {
                collection_id: collection_id.to_string(),
                delivered: report.delivered(),
                skipped: report.skipped(),
            },
        )
        .await;

        Ok(report)
    }

    /// Serve one item from cache or fetch it, then deliver it. Every failure
    /// turns into a skip.
    async fn process_item(
        &self,
        recipient: &str,
        collection_id: &str,
        group: &GroupRef,
        item: &ProviderItem,
        scratch: &mut Option<TempDir>,
    ) -> ItemStatus {
        if let Some(path) = self.cache.get_item(collection_id, &item.item_id).await {
            match self
                .bounded(self.transport.deliver(recipient, &path, &item.caption))
                .await
            {
                Ok(()) => {
                    debug!(recipient, collection = collection_id, item = %item.item_id, from_cache = true, "Delivered item");
                    return ItemStatus::Delivered { from_cache: true };
                }
                Err(e) => {
                    if self.cache.has_item(collection_id, &item.item_id).await {
                        return ItemStatus::Skipped {
                            reason: e.to_string(),
                        };
                    }
                    // Evicted between lookup and delivery
                    debug!(recipient, collection = collection_id, item = %item.item_id, error = %e, "Cached item vanished, refetching");
                }
            }
        }

        let dir = match self.scratch_dir(scratch).await {
            Ok(dir) => dir.to_path_buf(),
            Err(e) => {
                return ItemStatus::Skipped {
                    reason: format!("scratch space unavailable: {}", e),
                }
            }
        };
        let fetched = match self
            .bounded(self.provider.fetch_item(group, &item.item_id, &dir))
            .await
        {
            Ok(path) => path,
            Err(e) => {
                return ItemStatus::Skipped {
                    reason: e.to_string(),
                }
            }
        };

        if let Err(e) = self
            .cache
            .put_item(collection_id, &item.item_id, &fetched)
            .await
        {
            let _ = fs::remove_file(&fetched).await;
            return ItemStatus::Skipped {
                reason: format!("caching failed: {}", e),
            };
        }

        let delivered = self
            .bounded(self.transport.deliver(recipient, &fetched, &item.caption))
            .await;
        let _ = fs::remove_file(&fetched).await;

        match delivered {
            Ok(()) => {
                debug!(recipient, collection = collection_id, item = %item.item_id, from_cache = false, "Delivered item");
                ItemStatus::Delivered { from_cache: false }
            }
            Err(e) => ItemStatus::Skipped {
                reason: e.to_string(),
            },
        }
    }

    async fn scratch_dir<'a>(&self, scratch: &'a mut Option<TempDir>) -> std::io::Result<&'a Path> {
        let dir = match scratch.take() {
            Some(dir) => dir,
            None => {
                fs::create_dir_all(&self.config.scratch_dir).await?;
                tempfile::Builder::new()
                    .prefix("delivery-")
                    .tempdir_in(&self.config.scratch_dir)?
            }
        };
        Ok(scratch.insert(dir).path())
    }

    async fn notify(&self, recipient: &str, notice: Notice) {
        if let Err(e) = self.bounded(self.transport.notify(recipient, &notice)).await {
            warn!(recipient, error = %e, notice = ?notice, "Failed to notify recipient");
        }
    }

    async fn bounded<T, E, F>(&self, fut: F) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: From<tokio::time::error::Elapsed>,
    {
        match tokio::time::timeout(self.config.step_timeout, fut).await {
            Ok(result) => result,
            Err(elapsed) => Err(elapsed.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, TransportError};
    use async_trait::async_trait;
    use content_cache::CacheConfig;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct FakeProvider {
        groups: HashMap<String, Vec<(ProviderItem, Vec<u8>)>>,
        fetches: AtomicUsize,
        list_gate: Option<Arc<Semaphore>>,
        fail_list: bool,
        list_delay: Option<Duration>,
        fail_fetch: HashSet<String>,
        fetch_delay: Option<Duration>,
    }

    impl FakeProvider {
        fn with_group(mut self, group: &str, items: &[(&str, &str)]) -> Self {
            let items = items
                .iter()
                .map(|(id, body)| {
                    (
                        ProviderItem {
                            item_id: id.to_string(),
                            caption: format!("episode {id}"),
                        },
                        body.as_bytes().to_vec(),
                    )
                })
                .collect();
            self.groups.insert(group.to_string(), items);
            self
        }
    }

    #[async_trait]
    impl ContentProvider for FakeProvider {
        async fn list_items(
            &self,
            group: &GroupRef,
        ) -> std::result::Result<Vec<ProviderItem>, ProviderError> {
            if let Some(gate) = &self.list_gate {
                gate.acquire().await.unwrap().forget();
            }
            if let Some(delay) = self.list_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_list {
                return Err(ProviderError::Request("listing unavailable".to_string()));
            }
            Ok(self
                .groups
                .get(&group.0)
                .map(|items| items.iter().map(|(item, _)| item.clone()).collect())
                .unwrap_or_default())
        }

        async fn fetch_item(
            &self,
            group: &GroupRef,
            item_id: &str,
            dest_dir: &Path,
        ) -> std::result::Result<PathBuf, ProviderError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_fetch.contains(item_id) {
                return Err(ProviderError::Request(format!("no such media {item_id}")));
            }
            let body = self.groups[&group.0]
                .iter()
                .find(|(item, _)| item.item_id == item_id)
                .map(|(_, body)| body.clone())
                .unwrap();
            let path = dest_dir.join(item_id.replace('/', "_"));
            tokio::fs::write(&path, body).await?;
            Ok(path)
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        delivered: Mutex<Vec<(String, String, Vec<u8>)>>,
        notices: Mutex<Vec<(String, Notice)>>,
        reject_captions: HashSet<String>,
        deliver_delay: Option<Duration>,
        notify_delay: Option<Duration>,
        /// Deletes the next artifact before reading it
        drop_next_artifact: AtomicBool,
    }

    impl FakeTransport {
        fn captions(&self, recipient: &str) -> Vec<String> {
            self.delivered
                .lock()
                .unwrap()
                .iter()
                .filter(|(r, _, _)| r == recipient)
                .map(|(_, caption, _)| caption.clone())
                .collect()
        }

        fn notices(&self, recipient: &str) -> Vec<Notice> {
            self.notices
                .lock()
                .unwrap()
                .iter()
                .filter(|(r, _)| r == recipient)
                .map(|(_, n)| n.clone())
                .collect()
        }
    }

    #[async_trait]
    impl DeliveryTransport for FakeTransport {
        async fn deliver(
            &self,
            recipient: &str,
            artifact: &Path,
            caption: &str,
        ) -> std::result::Result<(), TransportError> {
            if let Some(delay) = self.deliver_delay {
                tokio::time::sleep(delay).await;
            }
            if self.drop_next_artifact.swap(false, Ordering::SeqCst) {
                tokio::fs::remove_file(artifact).await?;
            }
            if self.reject_captions.contains(caption) {
                return Err(TransportError::Rejected("file too large".to_string()));
            }
            let body = tokio::fs::read(artifact).await?;
            self.delivered.lock().unwrap().push((
                recipient.to_string(),
                caption.to_string(),
                body,
            ));
            Ok(())
        }

        async fn notify(
            &self,
            recipient: &str,
            notice: &Notice,
        ) -> std::result::Result<(), TransportError> {
            if let Some(delay) = self.notify_delay {
                tokio::time::sleep(delay).await;
            }
            self.notices
                .lock()
                .unwrap()
                .push((recipient.to_string(), notice.clone()));
            Ok(())
        }
    }

    struct MapResolver(HashMap<String, GroupRef>);

    impl CollectionResolver for MapResolver {
        fn resolve(&self, collection_id: &str) -> Option<GroupRef> {
            self.0.get(collection_id).cloned()
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        provider: Arc<FakeProvider>,
        transport: Arc<FakeTransport>,
        coordinator: Arc<DeliveryCoordinator>,
    }

    async fn harness(provider: FakeProvider, transport: FakeTransport) -> Harness {
        harness_with_timeout(provider, transport, Duration::from_secs(5)).await
    }

    async fn harness_with_timeout(
        provider: FakeProvider,
        transport: FakeTransport,
        step_timeout: Duration,
    ) -> Harness {
        let dir = tempdir().unwrap();
        let cache = ContentCache::open(CacheConfig::new(dir.path().join("cache")))
            .await
            .unwrap();
        let resolver = MapResolver(
            [
                ("s1", "group-1"),
                ("s2", "group-2"),
                ("empty", "group-empty"),
                ("odd", "group-odd"),
            ]
                .into_iter()
                .map(|(id, group)| (id.to_string(), GroupRef(group.to_string())))
                .collect(),
        );
        let provider = Arc::new(provider);
        let transport = Arc::new(transport);
        let coordinator = Arc::new(DeliveryCoordinator::new(
            Arc::new(cache),
            provider.clone(),
            transport.clone(),
            Arc::new(resolver),
            CoordinatorConfig {
                step_timeout,
                scratch_dir: dir.path().join("scratch"),
            },
        ));
        Harness {
            dir,
            provider,
            transport,
            coordinator,
        }
    }

    fn series_provider() -> FakeProvider {
        FakeProvider::default()
            .with_group("group-1", &[("101", "first"), ("102", "second"), ("103", "third")])
            .with_group("group-2", &[("201", "pilot")])
            .with_group("group-empty", &[])
            .with_group("group-odd", &[("bad/id", "slashed"), ("301", "fine")])
    }

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.step_timeout, Duration::from_secs(300));
        assert!(config.validate().is_ok());

        let zero = CoordinatorConfig {
            step_timeout: Duration::ZERO,
            ..CoordinatorConfig::default()
        };
        assert!(zero.validate().is_err());
    }

    #[tokio::test]
    async fn test_first_delivery_fetches_then_serves_from_cache() {
        let h = harness(series_provider(), FakeTransport::default()).await;

        let report = h.coordinator.deliver("u1", "s1").await.unwrap();
        assert!(!report.fully_cached);
        assert_eq!(report.delivered(), 3);
        assert_eq!(h.provider.fetches.load(Ordering::SeqCst), 3);
        assert_eq!(
            h.transport.captions("u1"),
            vec!["episode 101", "episode 102", "episode 103"]
        );
        assert!(h.coordinator.cache().has_collection("s1", ["101", "102", "103"]).await);

        let report = h.coordinator.deliver("u2", "s1").await.unwrap();
        assert!(report.fully_cached);
        assert!(report
            .items
            .iter()
            .all(|i| i.status == ItemStatus::Delivered { from_cache: true }));
        assert_eq!(h.provider.fetches.load(Ordering::SeqCst), 3);

        let bodies: Vec<Vec<u8>> = h
            .transport
            .delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _, _)| r == "u2")
            .map(|(_, _, body)| body.clone())
            .collect();
        assert_eq!(bodies, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);

        let notices = h.transport.notices("u2");
        assert_eq!(
            notices.first(),
            Some(&Notice::Started {
                collection_id: "s1".to_string(),
                total: 3,
                fully_cached: true,
            })
        );
        assert_eq!(
            notices.last(),
            Some(&Notice::Completed {
                collection_id: "s1".to_string(),
                delivered: 3,
                skipped: 0,
            })
        );
        assert_eq!(h.coordinator.active_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_collection_is_rejected_before_provider() {
        let h = harness(series_provider(), FakeTransport::default()).await;

        let err = h.coordinator.deliver("u1", "nope").await.unwrap_err();
        assert!(matches!(err, DeliveryError::NotFound(ref id) if id == "nope"));
        assert_eq!(h.provider.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.transport.notices("u1"),
            vec![Notice::NotFound {
                collection_id: "nope".to_string()
            }]
        );
        assert!(h.coordinator.active_collection("u1").is_none());
    }

    #[tokio::test]
    async fn test_empty_collection_aborts_and_releases() {
        let h = harness(series_provider(), FakeTransport::default()).await;

        let err = h.coordinator.deliver("u1", "empty").await.unwrap_err();
        assert!(matches!(err, DeliveryError::EmptyCollection(_)));
        assert_eq!(
            h.transport.notices("u1"),
            vec![Notice::Empty {
                collection_id: "empty".to_string()
            }]
        );
        assert_eq!(h.coordinator.cache().stats().await.collection_count, 0);
        assert_eq!(h.coordinator.active_count(), 0);
    }

    #[tokio::test]
    async fn test_listing_failure_reports_generic_failure() {
        let provider = FakeProvider {
            fail_list: true,
            ..series_provider()
        };
        let h = harness(provider, FakeTransport::default()).await;

        let err = h.coordinator.deliver("u1", "s1").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Provider(_)));
        assert_eq!(
            h.transport.notices("u1"),
            vec![Notice::Failed {
                collection_id: "s1".to_string()
            }]
        );
        assert_eq!(h.coordinator.active_count(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_item_and_continues() {
        let provider = FakeProvider {
            fail_fetch: HashSet::from(["102".to_string()]),
            ..series_provider()
        };
        let h = harness(provider, FakeTransport::default()).await;

        let report = h.coordinator.deliver("u1", "s1").await.unwrap();
        assert_eq!(report.delivered(), 2);
        assert_eq!(report.skipped(), 1);
        assert!(matches!(report.items[1].status, ItemStatus::Skipped { .. }));
        assert_eq!(h.transport.captions("u1"), vec!["episode 101", "episode 103"]);
        assert!(!h.coordinator.cache().has_item("s1", "102").await);
        assert!(h
            .transport
            .notices("u1")
            .iter()
            .any(|n| matches!(n, Notice::ItemSkipped { item_id, .. } if item_id == "102")));
    }

    #[tokio::test]
    async fn test_delivery_failure_is_not_fatal() {
        let transport = FakeTransport {
            reject_captions: HashSet::from(["episode 101".to_string()]),
            ..FakeTransport::default()
        };
        let h = harness(series_provider(), transport).await;

        let report = h.coordinator.deliver("u1", "s1").await.unwrap();
        assert_eq!(report.delivered(), 2);
        assert_eq!(
            report.items[0].status,
            ItemStatus::Skipped {
                reason: "Delivery rejected: file too large".to_string()
            }
        );
        // Fetched items are cached even when delivery fails
        assert!(h.coordinator.cache().has_item("s1", "101").await);
    }

    #[tokio::test]
    async fn test_fetch_timeout_skips_and_releases() {
        let provider = FakeProvider {
            fetch_delay: Some(Duration::from_millis(500)),
            ..series_provider()
        };
        let h = harness_with_timeout(provider, FakeTransport::default(), Duration::from_millis(50))
            .await;

        let report = h.coordinator.deliver("u1", "s2").await.unwrap();
        assert_eq!(
            report.items[0].status,
            ItemStatus::Skipped {
                reason: "Provider timed out".to_string()
            }
        );
        assert_eq!(h.coordinator.active_count(), 0);
    }

    #[tokio::test]
    async fn test_list_timeout_aborts_and_releases() {
        let provider = FakeProvider {
            list_delay: Some(Duration::from_millis(500)),
            ..series_provider()
        };
        let h = harness_with_timeout(provider, FakeTransport::default(), Duration::from_millis(50))
            .await;

        let err = h.coordinator.deliver("u1", "s1").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Provider(ProviderError::Timeout)));
        assert_eq!(
            h.transport.notices("u1"),
            vec![Notice::Failed {
                collection_id: "s1".to_string()
            }]
        );
        assert_eq!(h.provider.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(h.coordinator.active_count(), 0);
    }

    #[tokio::test]
    async fn test_delivery_timeout_skips_item() {
        let transport = FakeTransport {
            deliver_delay: Some(Duration::from_millis(500)),
            ..FakeTransport::default()
        };
        let h = harness_with_timeout(series_provider(), transport, Duration::from_millis(50)).await;

        let report = h.coordinator.deliver("u1", "s2").await.unwrap();
        assert_eq!(
            report.items[0].status,
            ItemStatus::Skipped {
                reason: TransportError::Timeout.to_string()
            }
        );
        assert!(h
            .transport
            .notices("u1")
            .iter()
            .any(|n| matches!(n, Notice::ItemSkipped { item_id, .. } if item_id == "201")));
        assert_eq!(h.coordinator.active_count(), 0);
    }

    #[tokio::test]
    async fn test_hanging_notices_do_not_hold_recipient() {
        let transport = FakeTransport {
            notify_delay: Some(Duration::from_millis(500)),
            ..FakeTransport::default()
        };
        let h = harness_with_timeout(series_provider(), transport, Duration::from_millis(50)).await;

        let report = h.coordinator.deliver("u1", "s2").await.unwrap();
        assert_eq!(report.delivered(), 1);
        assert!(h.transport.notices("u1").is_empty());
        assert_eq!(h.coordinator.active_count(), 0);
    }

    #[tokio::test]
    async fn test_not_found_does_not_wait_for_notice() {
        let transport = FakeTransport {
            notify_delay: Some(Duration::from_secs(2)),
            ..FakeTransport::default()
        };
        let h = harness(series_provider(), transport).await;

        let started = tokio::time::timeout(
            Duration::from_millis(500),
            h.coordinator.start("u1", "nope"),
        )
        .await
        .expect("start returned promptly");
        assert!(matches!(started, Err(DeliveryError::NotFound(_))));
        assert!(h.coordinator.active_collection("u1").is_none());
    }

    #[tokio::test]
    async fn test_caching_failure_skips_item() {
        let h = harness(series_provider(), FakeTransport::default()).await;

        let report = h.coordinator.deliver("u1", "odd").await.unwrap();
        match &report.items[0].status {
            ItemStatus::Skipped { reason } => assert!(reason.starts_with("caching failed")),
            other => panic!("expected skip, got {other:?}"),
        }
        assert_eq!(report.items[1].status, ItemStatus::Delivered { from_cache: false });
        assert_eq!(h.transport.captions("u1"), vec!["episode 301"]);
        assert!(h
            .transport
            .notices("u1")
            .iter()
            .any(|n| matches!(n, Notice::ItemSkipped { item_id, .. } if item_id == "bad/id")));

        let scratch = h.dir.path().join("scratch");
        assert_eq!(std::fs::read_dir(&scratch).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cached_item_evicted_before_delivery_is_refetched() {
        let h = harness(series_provider(), FakeTransport::default()).await;
        h.coordinator.deliver("u1", "s2").await.unwrap();
        assert_eq!(h.provider.fetches.load(Ordering::SeqCst), 1);

        h.transport.drop_next_artifact.store(true, Ordering::SeqCst);
        let report = h.coordinator.deliver("u2", "s2").await.unwrap();
        assert_eq!(report.items[0].status, ItemStatus::Delivered { from_cache: false });
        assert_eq!(h.provider.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(h.transport.captions("u2"), vec!["episode 201"]);
        assert!(h.coordinator.cache().has_item("s2", "201").await);
    }

    #[tokio::test]
    async fn test_same_recipient_is_busy_while_others_proceed() {
        let gate = Arc::new(Semaphore::new(0));
        let provider = FakeProvider {
            list_gate: Some(gate.clone()),
            ..series_provider()
        };
        let h = harness(provider, FakeTransport::default()).await;

        let first = h.coordinator.start("u1", "s1").await.unwrap();
        assert_eq!(h.coordinator.active_collection("u1").as_deref(), Some("s1"));

        let err = h.coordinator.start("u1", "s2").await.err().unwrap();
        match err {
            DeliveryError::Busy {
                active_collection, ..
            } => assert_eq!(active_collection, "s1"),
            other => panic!("expected busy, got {other:?}"),
        }
        assert!(h.coordinator.deliver("u1", "s1").await.unwrap_err().is_busy());

        let second = h.coordinator.start("u2", "s2").await.unwrap();
        assert_eq!(h.coordinator.active_count(), 2);

        gate.add_permits(2);
        assert_eq!(first.await.unwrap().unwrap().delivered(), 3);
        assert_eq!(second.await.unwrap().unwrap().delivered(), 1);

        assert_eq!(h.coordinator.active_count(), 0);
        assert!(h.transport.notices("u1").iter().all(|n| !matches!(
            n,
            Notice::Started { collection_id, .. } if collection_id == "s2"
        )));
        let third = h.coordinator.start("u1", "s2").await.unwrap();
        gate.add_permits(1);
        assert_eq!(third.await.unwrap().unwrap().collection_id, "s2");
    }

    #[tokio::test]
    async fn test_scratch_files_are_cleaned_up() {
        let h = harness(series_provider(), FakeTransport::default()).await;
        h.coordinator.deliver("u1", "s1").await.unwrap();

        let scratch = h.dir.path().join("scratch");
        let leftovers: Vec<_> = std::fs::read_dir(&scratch).unwrap().collect();
        assert!(leftovers.is_empty());
    }
}
