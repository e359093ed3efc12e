//! Ingestion Pipeline
//!
//! Per-record state machine:
//!
//! ```text
//! RECEIVED ──decode──▶ PARSED ──cache.has──▶ DUPLICATE ───────────────▶ ack
//!     │                  │
//!     │ malformed        └──save_if_absent──▶ PERSISTED ──cache.set──▶ CACHED ──▶ ack
//!     ▼                         │
//!  DISCARDED ──▶ ack            └─ error ──▶ FAILED ──▶ redeliver (no ack)
//! ```
//!
//! Records are processed one at a time in delivery order. The cache is only
//! written after the store confirmed the order, so cache presence always
//! implies durability. When the store already held the order, only presence
//! is cached: the inbound body is never served or mirrored in place of the
//! stored one.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::FingerprintCache;
use crate::domain::ports::{InboundRecord, OrderStore, OrderStream, SaveOutcome};
use crate::domain::{Order, OrderId};
use crate::error::{within, Error, Result};
use crate::metrics::ServiceMetrics;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the ingestion pipeline
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Deadline for each store call
    pub store_timeout: Duration,

    /// Bound on a single stream read, so cancellation is observed promptly
    pub poll_timeout: Duration,

    /// Pause after a transient failure before reading again
    pub redelivery_backoff: Duration,

    /// Mirror serialized payloads into the store's blob table
    pub blob_mirror: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_millis(500),
            redelivery_backoff: Duration::from_secs(1),
            blob_mirror: false,
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Terminal state of one inbound record
#[derive(Debug)]
pub enum IngestOutcome {
    /// Persisted (or found persisted by the store) and cached
    Cached { id: OrderId, save: SaveOutcome },

    /// Already in the cache; no store call was made
    Duplicate(OrderId),

    /// Undecodable; acknowledged and dropped
    Discarded(String),

    /// Store call failed; the record must be redelivered
    Failed { id: OrderId, error: Error },
}

impl IngestOutcome {
    /// Whether consumption progress may be committed for this record
    pub fn should_ack(&self) -> bool {
        !matches!(self, IngestOutcome::Failed { .. })
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Cached { .. } => "cached",
            IngestOutcome::Duplicate(_) => "duplicate",
            IngestOutcome::Discarded(_) => "discarded",
            IngestOutcome::Failed { .. } => "failed",
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Deduplicating stream consumer
pub struct IngestionPipeline {
    config: IngestConfig,
    cache: Arc<FingerprintCache>,
    store: Arc<dyn OrderStore>,
    metrics: ServiceMetrics,
    /// (partition, offset, attempts) of the record currently being redelivered
    failure_streak: Mutex<Option<(i32, i64, u64)>>,
}

impl IngestionPipeline {
    pub fn new(
        config: IngestConfig,
        cache: Arc<FingerprintCache>,
        store: Arc<dyn OrderStore>,
        metrics: ServiceMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            cache,
            store,
            metrics,
            failure_streak: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Drive one payload through the state machine. Never acknowledges;
    /// see [`IngestionPipeline::handle`] for the stream-facing variant.
    pub async fn process(&self, payload: &Bytes) -> IngestOutcome {
        let order = match Order::decode(payload) {
            Ok(order) => order,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "Discarding malformed record");
                return IngestOutcome::Discarded(e.to_string());
            }
        };
        let id = order.id().clone();

        if self.cache.has(id.as_str()) {
            debug!(order_uid = %id, "Duplicate record, already cached");
            return IngestOutcome::Duplicate(id);
        }

        let save = match within(
            self.config.store_timeout,
            "save_if_absent",
            self.store.save_if_absent(&order),
        )
        .await
        {
            Ok(save) => save,
            Err(error) => {
                error!(
                    order_uid = %id,
                    error = %error,
                    transient = error.is_transient(),
                    "Failed to persist order"
                );
                return IngestOutcome::Failed { id, error };
            }
        };

        if save == SaveOutcome::AlreadyPresent {
            // The stored record wins; the inbound body may differ from it.
            info!(order_uid = %id, "Order was already persisted, caching presence only");
            self.cache.set(id.as_str(), None);
            self.metrics.set_cache_entries(self.cache.len());
            return IngestOutcome::Cached { id, save };
        }

        self.cache.set(id.as_str(), Some(payload.clone()));
        self.metrics.set_cache_entries(self.cache.len());

        if self.config.blob_mirror {
            if let Err(e) = within(
                self.config.store_timeout,
                "cache_blob",
                self.store.cache_blob(&id, payload),
            )
            .await
            {
                warn!(order_uid = %id, error = %e, "Failed to mirror order payload");
            }
        }

        info!(order_uid = %id, "Order ingested");
        IngestOutcome::Cached { id, save }
    }

    /// Process a delivered record and settle it with the stream: acknowledge
    /// on success, duplicate or malformed input; hand it back otherwise.
    pub async fn handle(&self, stream: &dyn OrderStream, record: &InboundRecord) -> IngestOutcome {
        let outcome = self.process(&record.payload).await;
        self.metrics.record_ingest(outcome.label());

        let attempts = self.track_failures(record, !outcome.should_ack());
        self.metrics.set_consecutive_failures(attempts);
        if let IngestOutcome::Failed { id, error } = &outcome {
            if !error.is_transient() {
                error!(
                    order_uid = %id,
                    partition = record.partition,
                    offset = record.offset,
                    attempts,
                    "Store rejects this record; its partition stays blocked until the store accepts it"
                );
            } else if attempts > 1 {
                warn!(
                    order_uid = %id,
                    partition = record.partition,
                    offset = record.offset,
                    attempts,
                    "Record failed again"
                );
            }
        }

        if outcome.should_ack() {
            if let Err(e) = stream.ack(record).await {
                warn!(
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Failed to acknowledge record"
                );
            }
        } else if let Err(e) = stream.redeliver(record).await {
            error!(
                partition = record.partition,
                offset = record.offset,
                error = %e,
                "Failed to schedule redelivery"
            );
        }

        outcome
    }

    /// Consecutive failed attempts for the record at `record`'s position.
    /// Resets on any settled record.
    fn track_failures(&self, record: &InboundRecord, failed: bool) -> u64 {
        let mut streak = self.failure_streak.lock();
        if !failed {
            *streak = None;
            return 0;
        }

        let attempts = match *streak {
            Some((partition, offset, n)) if partition == record.partition && offset == record.offset => n + 1,
            _ => 1,
        };
        *streak = Some((record.partition, record.offset, attempts));
        attempts
    }

    /// Consume until `cancel` fires.
    ///
    /// A record already being processed is allowed to finish; its store call
    /// is bounded by `store_timeout`.
    pub async fn run(
        self: Arc<Self>,
        stream: Arc<dyn OrderStream>,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!("Starting ingestion loop with {:?}", self.config);

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = tokio::time::timeout(self.config.poll_timeout, stream.next()) => polled,
            };

            let record = match polled {
                Ok(Ok(Some(record))) => record,
                Ok(Ok(None)) => {
                    if !pause(&cancel, self.config.poll_timeout).await {
                        break;
                    }
                    continue;
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Stream read failed");
                    if !pause(&cancel, self.config.redelivery_backoff).await {
                        break;
                    }
                    continue;
                }
                // Nothing arrived within the poll window
                Err(_) => continue,
            };

            let outcome = self.handle(stream.as_ref(), &record).await;
            if !outcome.should_ack() && !pause(&cancel, self.config.redelivery_backoff).await {
                break;
            }
        }

        info!("Ingestion loop stopped");
        Ok(())
    }
}

/// Sleep for `period` unless cancelled first. Returns false on cancellation.
async fn pause(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryOrderStore, InMemoryOrderStream};
    use crate::cache::{CacheHit, CacheMode};
    use assert_matches::assert_matches;

    struct Fixture {
        pipeline: Arc<IngestionPipeline>,
        cache: Arc<FingerprintCache>,
        store: Arc<InMemoryOrderStore>,
        metrics: ServiceMetrics,
    }

    fn fixture(config: IngestConfig) -> Fixture {
        let cache = FingerprintCache::unbounded(CacheMode::Payload);
        let store = Arc::new(InMemoryOrderStore::new());
        let metrics = ServiceMetrics::new().unwrap();
        let pipeline = IngestionPipeline::new(config, cache.clone(), store.clone(), metrics.clone());
        Fixture {
            pipeline,
            cache,
            store,
            metrics,
        }
    }

    fn payload(id: &str) -> Bytes {
        Order::new(OrderId::parse(id).unwrap()).encode().unwrap()
    }

    #[tokio::test]
    async fn test_new_order_is_persisted_then_cached() {
        let f = fixture(IngestConfig::default());
        let bytes = payload("A1");

        let outcome = f.pipeline.process(&bytes).await;
        assert_matches!(outcome, IngestOutcome::Cached { save: SaveOutcome::Inserted, .. });
        assert_eq!(f.store.calls().inserts, 1);
        assert_eq!(f.cache.get("A1"), Some(CacheHit::Payload(bytes)));
    }

    #[tokio::test]
    async fn test_second_delivery_is_duplicate_without_store_call() {
        let f = fixture(IngestConfig::default());
        let bytes = payload("A1");

        f.pipeline.process(&bytes).await;
        let outcome = f.pipeline.process(&bytes).await;

        assert_matches!(outcome, IngestOutcome::Duplicate(id) if id.as_str() == "A1");
        assert_eq!(f.store.calls().saves, 1);
    }

    #[tokio::test]
    async fn test_cold_cache_relies_on_store_idempotence() {
        let f = fixture(IngestConfig::default());
        f.store.seed(Order::new(OrderId::parse("A1").unwrap()));

        let outcome = f.pipeline.process(&payload("A1")).await;
        assert_matches!(outcome, IngestOutcome::Cached { save: SaveOutcome::AlreadyPresent, .. });
        assert!(f.cache.has("A1"));
        assert_eq!(f.store.calls().inserts, 0);
    }

    #[tokio::test]
    async fn test_already_persisted_order_keeps_stored_body() {
        let f = fixture(IngestConfig {
            blob_mirror: true,
            ..Default::default()
        });
        let id = OrderId::parse("A1").unwrap();
        let mut stored = Order::new(id.clone());
        stored.track_number = "FIRST".to_string();
        f.store.seed(stored);

        let mut resent = Order::new(id.clone());
        resent.track_number = "SECOND".to_string();
        let outcome = f.pipeline.process(&resent.encode().unwrap()).await;

        assert_matches!(outcome, IngestOutcome::Cached { save: SaveOutcome::AlreadyPresent, .. });
        assert_eq!(f.cache.get("A1"), Some(CacheHit::Present));
        assert_eq!(f.store.blob(&id), None);
        assert_eq!(f.store.calls().blob_writes, 0);
        assert_eq!(f.store.get(&id).unwrap().track_number, "FIRST");
    }

    #[tokio::test]
    async fn test_malformed_payloads_are_discarded() {
        let f = fixture(IngestConfig::default());

        for bad in [&b"not json"[..], br#"{"order_uid":""}"#, br#"{"track_number":"X"}"#, b""] {
            let outcome = f.pipeline.process(&Bytes::copy_from_slice(bad)).await;
            assert_matches!(outcome, IngestOutcome::Discarded(_));
            assert!(outcome.should_ack());
        }
        assert_eq!(f.store.calls().saves, 0);
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_leaves_cache_untouched() {
        let f = fixture(IngestConfig::default());
        f.store.set_failing(true);

        let outcome = f.pipeline.process(&payload("A1")).await;
        assert_matches!(
            &outcome,
            IngestOutcome::Failed { error: Error::TransientStore(_), .. }
        );
        assert!(!outcome.should_ack());
        assert!(!f.cache.has("A1"));
    }

    #[tokio::test]
    async fn test_blob_mirror_writes_payload() {
        let f = fixture(IngestConfig {
            blob_mirror: true,
            ..Default::default()
        });
        let bytes = payload("A1");

        f.pipeline.process(&bytes).await;
        let id = OrderId::parse("A1").unwrap();
        assert_eq!(f.store.blob(&id), Some(bytes));
    }

    #[tokio::test]
    async fn test_handle_settles_with_stream() {
        let f = fixture(IngestConfig::default());
        let stream = InMemoryOrderStream::new();
        stream.push(payload("A1"));
        stream.push("garbage");

        let first = stream.next().await.unwrap().unwrap();
        f.pipeline.handle(&stream, &first).await;
        let second = stream.next().await.unwrap().unwrap();
        f.pipeline.handle(&stream, &second).await;

        assert_eq!(stream.acked().len(), 2);
        assert!(stream.redelivered().is_empty());
        assert_eq!(f.metrics.ingest_count("cached"), 1);
        assert_eq!(f.metrics.ingest_count("discarded"), 1);
    }

    #[tokio::test]
    async fn test_repeated_failures_are_counted_per_record() {
        let f = fixture(IngestConfig::default());
        let stream = InMemoryOrderStream::new();
        stream.push(payload("A1"));
        f.store.set_failing(true);

        for expected in 1..=3 {
            let record = stream.next().await.unwrap().unwrap();
            assert_eq!(record.offset, 0);
            let outcome = f.pipeline.handle(&stream, &record).await;
            assert_matches!(&outcome, IngestOutcome::Failed { error, .. } if error.is_transient());
            assert_eq!(f.metrics.consecutive_failures(), expected);
        }

        f.store.set_failing(false);
        let record = stream.next().await.unwrap().unwrap();
        f.pipeline.handle(&stream, &record).await;
        assert_eq!(f.metrics.consecutive_failures(), 0);
        assert_eq!(stream.acked().len(), 1);
        assert_eq!(stream.redelivered().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_failure_via_redelivery() {
        let f = fixture(IngestConfig::default());
        let stream = Arc::new(InMemoryOrderStream::new());
        stream.push(payload("A1"));
        f.store.set_failing(true);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(f.pipeline.clone().run(stream.clone(), cancel.clone()));

        // First attempt fails and the record goes back to the stream.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stream.redelivered().len(), 1);
        assert!(stream.acked().is_empty());

        // After the backoff the redelivered record succeeds.
        f.store.set_failing(false);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(stream.acked().len(), 1);
        assert!(f.cache.has("A1"));

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(f.metrics.ingest_count("failed"), 1);
        assert_eq!(f.metrics.ingest_count("cached"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel_while_idle() {
        let f = fixture(IngestConfig::default());
        let stream = Arc::new(InMemoryOrderStream::new());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(f.pipeline.clone().run(stream, cancel.clone()));
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();

        task.await.unwrap().unwrap();
    }
}
