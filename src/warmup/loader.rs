//! Warm-Start Loader
//!
//! Populates the cache from the store before ingestion and lookup start.
//! Nothing here can fail startup: a failed listing leaves the cache empty and
//! a failed key is logged and left to the lookup miss path.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CacheMode, FingerprintCache};
use crate::domain::ports::OrderStore;
use crate::domain::{Order, OrderId};
use crate::error::{within, Error, Result};
use crate::metrics::ServiceMetrics;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the warm-start loader
#[derive(Debug, Clone)]
pub struct WarmStartConfig {
    /// Maximum concurrent store fetches
    pub concurrency: usize,

    /// Deadline for listing all identifiers
    pub list_timeout: Duration,

    /// Deadline for each per-key fetch
    pub fetch_timeout: Duration,

    /// Try the blob mirror before the relational fetch
    pub prefer_blob: bool,

    /// After a relational fetch, write the serialized order to the blob mirror
    pub write_back_blob: bool,
}

impl Default for WarmStartConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            list_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(5),
            prefer_blob: false,
            write_back_blob: false,
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// Summary of one warm start
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmStartReport {
    /// Identifiers returned by the store listing
    pub listed: usize,
    /// Keys placed in the cache
    pub loaded: usize,
    /// Keys loaded straight from the blob mirror
    pub from_blob: usize,
    /// Keys that could not be loaded
    pub failed: usize,
    /// The listing itself failed; the cache was left empty
    pub list_failed: bool,
    pub elapsed: Duration,
}

enum KeySource {
    Blob,
    Store,
}

// =============================================================================
// Loader
// =============================================================================

pub struct WarmStartLoader {
    config: WarmStartConfig,
    cache: Arc<FingerprintCache>,
    store: Arc<dyn OrderStore>,
    metrics: ServiceMetrics,
}

impl WarmStartLoader {
    pub fn new(
        config: WarmStartConfig,
        cache: Arc<FingerprintCache>,
        store: Arc<dyn OrderStore>,
        metrics: ServiceMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            cache,
            store,
            metrics,
        })
    }

    /// Load every persisted identifier into the cache. Returns once all
    /// fetches have drained.
    #[instrument(skip(self))]
    pub async fn run(self: &Arc<Self>) -> WarmStartReport {
        let started = Instant::now();
        let mut report = WarmStartReport::default();

        let ids = match within(self.config.list_timeout, "list_ids", self.store.list_ids()).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to list orders, starting with an empty cache");
                report.list_failed = true;
                report.elapsed = started.elapsed();
                return report;
            }
        };
        report.listed = ids.len();
        info!(orders = ids.len(), mode = %self.cache.mode(), "Warm start: loading orders");

        if self.cache.mode() == CacheMode::Presence {
            for id in ids {
                self.cache.set(id.as_str(), None);
                self.metrics.record_warm_start_key("loaded");
            }
            report.loaded = report.listed;
        } else {
            self.load_payloads(ids, &mut report).await;
        }

        report.elapsed = started.elapsed();
        self.metrics.set_cache_entries(self.cache.len());
        info!(
            listed = report.listed,
            loaded = report.loaded,
            from_blob = report.from_blob,
            failed = report.failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Warm start finished"
        );
        report
    }

    async fn load_payloads(self: &Arc<Self>, ids: Vec<OrderId>, report: &mut WarmStartReport) {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for id in ids {
            let loader = Arc::clone(self);
            let permits = Arc::clone(&permits);
            join_set.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Internal(format!("warm start permit: {}", e)))?;
                loader.load_one(&id).await.map_err(|e| {
                    warn!(order_uid = %id, error = %e, "Failed to warm order, skipping");
                    e
                })
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(source)) => {
                    report.loaded += 1;
                    if matches!(source, KeySource::Blob) {
                        report.from_blob += 1;
                    }
                    self.metrics.record_warm_start_key("loaded");
                }
                Ok(Err(_)) => {
                    report.failed += 1;
                    self.metrics.record_warm_start_key("failed");
                }
                Err(e) => {
                    error!(error = %e, "Warm start task panicked");
                    report.failed += 1;
                    self.metrics.record_warm_start_key("failed");
                }
            }
        }
    }

    async fn load_one(&self, id: &OrderId) -> Result<KeySource> {
        if self.config.prefer_blob {
            if let Some(blob) = self.valid_blob(id).await {
                self.cache.set(id.as_str(), Some(blob));
                return Ok(KeySource::Blob);
            }
        }

        let order = within(self.config.fetch_timeout, "fetch", self.store.fetch(id))
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let payload = order.encode()?;

        if self.config.write_back_blob {
            if let Err(e) = within(
                self.config.fetch_timeout,
                "cache_blob",
                self.store.cache_blob(id, &payload),
            )
            .await
            {
                warn!(order_uid = %id, error = %e, "Failed to write back order blob");
            }
        }

        self.cache.set(id.as_str(), Some(payload));
        Ok(KeySource::Store)
    }

    /// Mirrored blob for `id`, if it exists and decodes to the same order.
    async fn valid_blob(&self, id: &OrderId) -> Option<Bytes> {
        let blob = match within(self.config.fetch_timeout, "fetch_blob", self.store.fetch_blob(id)).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                debug!(order_uid = %id, error = %e, "Blob read failed, falling back to full fetch");
                return None;
            }
        };

        match Order::decode(&blob) {
            Ok(order) if order.id() == id => Some(blob),
            Ok(order) => {
                warn!(order_uid = %id, blob_uid = %order.id(), "Blob belongs to another order");
                None
            }
            Err(e) => {
                warn!(order_uid = %id, error = %e, "Blob is not a valid order");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryOrderStore;
    use crate::cache::CacheHit;

    fn loader(
        mode: CacheMode,
        config: WarmStartConfig,
    ) -> (Arc<WarmStartLoader>, Arc<FingerprintCache>, Arc<InMemoryOrderStore>) {
        let cache = FingerprintCache::unbounded(mode);
        let store = Arc::new(InMemoryOrderStore::new());
        let loader = WarmStartLoader::new(config, cache.clone(), store.clone(), ServiceMetrics::new().unwrap());
        (loader, cache, store)
    }

    fn seed(store: &InMemoryOrderStore, ids: &[&str]) {
        for id in ids {
            store.seed(Order::new(OrderId::parse(*id).unwrap()));
        }
    }

    #[tokio::test]
    async fn test_loads_every_key() {
        let (loader, cache, store) = loader(CacheMode::Payload, WarmStartConfig::default());
        let ids: Vec<String> = (0..20).map(|i| format!("order-{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        seed(&store, &refs);

        let report = loader.run().await;
        assert_eq!(report.listed, 20);
        assert_eq!(report.loaded, 20);
        assert_eq!(report.failed, 0);
        assert_eq!(cache.len(), 20);
        assert_eq!(store.calls().fetches, 20);
        assert!(matches!(cache.get("order-7"), Some(CacheHit::Payload(_))));
    }

    #[tokio::test]
    async fn test_presence_mode_skips_fetches() {
        let (loader, cache, store) = loader(CacheMode::Presence, WarmStartConfig::default());
        seed(&store, &["A1", "B2"]);

        let report = loader.run().await;
        assert_eq!(report.loaded, 2);
        assert_eq!(store.calls().fetches, 0);
        assert_eq!(cache.get("A1"), Some(CacheHit::Present));
    }

    #[tokio::test]
    async fn test_list_failure_leaves_cache_empty() {
        let (loader, cache, store) = loader(CacheMode::Payload, WarmStartConfig::default());
        seed(&store, &["A1"]);
        store.set_failing(true);

        let report = loader.run().await;
        assert!(report.list_failed);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failed_key_is_skipped() {
        let (loader, cache, store) = loader(CacheMode::Payload, WarmStartConfig::default());
        seed(&store, &["A1", "B2", "C3", "D4"]);
        store.fail_id(&OrderId::parse("B2").unwrap());

        let report = loader.run().await;
        assert!(!report.list_failed);
        assert_eq!(report.listed, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.loaded, 3);
        assert!(!cache.has("B2"));
        for id in ["A1", "C3", "D4"] {
            assert!(cache.has(id));
        }
        assert_eq!(loader.metrics.warm_start_count("failed"), 1);
        assert_eq!(loader.metrics.warm_start_count("loaded"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_respect_concurrency_ceiling() {
        let config = WarmStartConfig {
            concurrency: 3,
            ..Default::default()
        };
        let (loader, cache, store) = loader(CacheMode::Payload, config);
        let ids: Vec<String> = (0..12).map(|i| format!("order-{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        seed(&store, &refs);
        store.set_fetch_delay(Duration::from_millis(50));

        let report = loader.run().await;
        assert_eq!(report.loaded, 12);
        assert_eq!(cache.len(), 12);
        assert_eq!(store.max_fetches_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_prefers_valid_blob() {
        let config = WarmStartConfig {
            prefer_blob: true,
            write_back_blob: true,
            ..Default::default()
        };
        let (loader, cache, store) = loader(CacheMode::Payload, config);
        seed(&store, &["A1", "B2", "C3"]);

        let a1 = OrderId::parse("A1").unwrap();
        let b2 = OrderId::parse("B2").unwrap();
        let c3 = OrderId::parse("C3").unwrap();
        store.seed_blob(&a1, Order::new(a1.clone()).encode().unwrap());
        // Wrong identifier inside the blob
        store.seed_blob(&b2, Order::new(c3.clone()).encode().unwrap());

        let report = loader.run().await;
        assert_eq!(report.loaded, 3);
        assert_eq!(report.from_blob, 1);
        assert_eq!(store.calls().fetches, 2);
        assert_eq!(cache.len(), 3);

        // Store fetches were mirrored back, replacing the bad blob
        let rewritten = Order::decode(&store.blob(&b2).unwrap()).unwrap();
        assert_eq!(rewritten.id(), &b2);
        assert!(store.blob(&c3).is_some());
    }
}
