//! Lookup Service - read-through point queries
//!
//! ```text
//! CHECK_CACHE ──hit──▶ CACHE_HIT
//!      │
//!      └─miss──▶ CHECK_STORE ──found──▶ POPULATE_CACHE
//!                     │
//!                     └─absent──▶ NotFound (cache untouched)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::cache::{CacheHit, FingerprintCache};
use crate::domain::ports::OrderStore;
use crate::domain::{Order, OrderId};
use crate::error::{within, Error, Result};
use crate::metrics::ServiceMetrics;

/// Configuration for the lookup service
#[derive(Debug, Clone)]
pub struct LookupConfig {
    /// Deadline for the store fetch on a cache miss
    pub store_timeout: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// How much of the order the caller needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    /// Confirmation that the order exists is enough
    Summary,
    /// The full order is required
    Full,
}

/// Where the answer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Cache,
    Store,
}

impl LookupSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupSource::Cache => "cache",
            LookupSource::Store => "store",
        }
    }
}

/// What the lookup found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderView {
    /// The order exists; no payload was available without a store fetch
    Confirmed(OrderId),
    /// The full order
    Full(Box<Order>),
}

impl OrderView {
    pub fn id(&self) -> &OrderId {
        match self {
            OrderView::Confirmed(id) => id,
            OrderView::Full(order) => order.id(),
        }
    }
}

/// A successful lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub view: OrderView,
    pub source: LookupSource,
}

/// Cache-first order lookup with store fallback
pub struct LookupService {
    config: LookupConfig,
    cache: Arc<FingerprintCache>,
    store: Arc<dyn OrderStore>,
    metrics: ServiceMetrics,
}

impl LookupService {
    pub fn new(
        config: LookupConfig,
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

    /// Look up an order by raw identifier.
    ///
    /// An empty identifier is rejected before the cache or the store is
    /// consulted. A miss in both surfaces [`Error::NotFound`] and leaves the
    /// cache unchanged.
    #[instrument(skip(self, raw_id), fields(order_uid = %raw_id))]
    pub async fn lookup(&self, raw_id: &str, detail: Detail) -> Result<Lookup> {
        let id = match OrderId::parse(raw_id) {
            Ok(id) => id,
            Err(e) => {
                self.metrics.record_lookup("bad_request");
                return Err(e);
            }
        };

        if let Some(view) = self.from_cache(&id, detail) {
            self.metrics.record_lookup(LookupSource::Cache.as_str());
            return Ok(Lookup {
                view,
                source: LookupSource::Cache,
            });
        }

        let fetched = within(self.config.store_timeout, "fetch", self.store.fetch(&id)).await;
        let order = match fetched {
            Ok(Some(order)) => order,
            Ok(None) => {
                debug!("Order not found in cache or store");
                self.metrics.record_lookup("not_found");
                return Err(Error::NotFound(id.to_string()));
            }
            Err(e) => {
                warn!(error = %e, "Store fetch failed");
                self.metrics.record_lookup("error");
                return Err(e);
            }
        };

        match order.encode() {
            Ok(payload) => {
                self.cache.set(id.as_str(), Some(payload));
                self.metrics.set_cache_entries(self.cache.len());
            }
            Err(e) => warn!(error = %e, "Failed to serialize fetched order for caching"),
        }

        self.metrics.record_lookup(LookupSource::Store.as_str());
        Ok(Lookup {
            view: OrderView::Full(Box::new(order)),
            source: LookupSource::Store,
        })
    }

    fn from_cache(&self, id: &OrderId, detail: Detail) -> Option<OrderView> {
        match self.cache.get(id.as_str())? {
            CacheHit::Payload(payload) => match Order::decode(&payload) {
                Ok(order) if order.id() == id => Some(OrderView::Full(Box::new(order))),
                Ok(order) => {
                    warn!(cached_uid = %order.id(), "Cached payload belongs to another order, dropping it");
                    self.cache.delete(id.as_str());
                    None
                }
                Err(e) => {
                    warn!(error = %e, "Cached payload is corrupt, dropping it");
                    self.cache.delete(id.as_str());
                    None
                }
            },
            CacheHit::Present => match detail {
                Detail::Summary => Some(OrderView::Confirmed(id.clone())),
                Detail::Full => None,
            },
        }
    }
}
