//! In-Memory Adapters
//!
//! Test doubles for the store and stream ports. Both count calls and can be
//! told to fail, so tests can assert exactly how the core used them.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

use crate::domain::ports::{InboundRecord, OrderStore, OrderStream, SaveOutcome};
use crate::domain::{Order, OrderId};
use crate::error::{Error, Result};

// =============================================================================
// Store
// =============================================================================

/// Call counters of an [`InMemoryOrderStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub saves: u64,
    pub inserts: u64,
    pub fetches: u64,
    pub lists: u64,
    pub blob_writes: u64,
    pub blob_reads: u64,
}

/// In-memory order store for testing
pub struct InMemoryOrderStore {
    orders: DashMap<OrderId, Order>,
    blobs: DashMap<OrderId, Bytes>,
    failing: AtomicBool,
    failing_ids: DashSet<OrderId>,
    fetch_delay: Mutex<Option<Duration>>,
    fetches_in_flight: AtomicU64,
    max_fetches_in_flight: AtomicU64,
    saves: AtomicU64,
    inserts: AtomicU64,
    fetches: AtomicU64,
    lists: AtomicU64,
    blob_writes: AtomicU64,
    blob_reads: AtomicU64,
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self {
            orders: DashMap::new(),
            blobs: DashMap::new(),
            failing: AtomicBool::new(false),
            failing_ids: DashSet::new(),
            fetch_delay: Mutex::new(None),
            fetches_in_flight: AtomicU64::new(0),
            max_fetches_in_flight: AtomicU64::new(0),
            saves: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
            lists: AtomicU64::new(0),
            blob_writes: AtomicU64::new(0),
            blob_reads: AtomicU64::new(0),
        }
    }
}

impl InMemoryOrderStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an order directly, bypassing the counters
    pub fn seed(&self, order: Order) {
        self.orders.insert(order.id().clone(), order);
    }

    /// Seed a mirrored blob directly
    pub fn seed_blob(&self, id: &OrderId, blob: impl Into<Bytes>) {
        self.blobs.insert(id.clone(), blob.into());
    }

    /// Make every subsequent call fail with a transient error (or recover)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make point operations on `id` fail with a transient error
    pub fn fail_id(&self, id: &OrderId) {
        self.failing_ids.insert(id.clone());
    }

    /// Hold every `fetch` for `delay` before answering
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = Some(delay);
    }

    /// Highest number of `fetch` calls observed running at once
    pub fn max_fetches_in_flight(&self) -> u64 {
        self.max_fetches_in_flight.load(Ordering::SeqCst)
    }

    /// Get a stored order without counting a fetch
    pub fn get(&self, id: &OrderId) -> Option<Order> {
        self.orders.get(id).map(|o| o.clone())
    }

    /// Get a mirrored blob without counting a read
    pub fn blob(&self, id: &OrderId) -> Option<Bytes> {
        self.blobs.get(id).map(|b| b.clone())
    }

    /// Number of stored orders
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Snapshot of the call counters
    pub fn calls(&self) -> StoreCalls {
        StoreCalls {
            saves: self.saves.load(Ordering::SeqCst),
            inserts: self.inserts.load(Ordering::SeqCst),
            fetches: self.fetches.load(Ordering::SeqCst),
            lists: self.lists.load(Ordering::SeqCst),
            blob_writes: self.blob_writes.load(Ordering::SeqCst),
            blob_reads: self.blob_reads.load(Ordering::SeqCst),
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::TransientStore("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn check_id(&self, id: &OrderId) -> Result<()> {
        self.check_available()?;
        if self.failing_ids.contains(id) {
            return Err(Error::TransientStore(format!("store unavailable for {}", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn save_if_absent(&self, order: &Order) -> Result<SaveOutcome> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.check_id(order.id())?;

        match self.orders.entry(order.id().clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(SaveOutcome::AlreadyPresent),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(order.clone());
                self.inserts.fetch_add(1, Ordering::SeqCst);
                Ok(SaveOutcome::Inserted)
            }
        }
    }

    async fn fetch(&self, id: &OrderId) -> Result<Option<Order>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let running = self.fetches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_fetches_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.fetches_in_flight.fetch_sub(1, Ordering::SeqCst);

        self.check_id(id)?;
        Ok(self.get(id))
    }

    async fn list_ids(&self) -> Result<Vec<OrderId>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut ids: Vec<OrderId> = self.orders.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn cache_blob(&self, id: &OrderId, blob: &[u8]) -> Result<()> {
        self.blob_writes.fetch_add(1, Ordering::SeqCst);
        self.check_id(id)?;
        self.blobs.insert(id.clone(), Bytes::copy_from_slice(blob));
        Ok(())
    }

    async fn fetch_blob(&self, id: &OrderId) -> Result<Option<Bytes>> {
        self.blob_reads.fetch_add(1, Ordering::SeqCst);
        self.check_id(id)?;
        Ok(self.blob(id))
    }

    async fn health_check(&self) -> Result<()> {
        self.check_available()
    }
}

// =============================================================================
// Stream
// =============================================================================

/// In-memory at-least-once stream for testing.
///
/// Records handed to `redeliver` go back to the front of the queue.
#[derive(Default)]
pub struct InMemoryOrderStream {
    pending: Mutex<VecDeque<InboundRecord>>,
    acked: Mutex<Vec<InboundRecord>>,
    redelivered: Mutex<Vec<InboundRecord>>,
    next_offset: AtomicU64,
}

impl InMemoryOrderStream {
    /// Create an empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload on partition 0; returns its offset
    pub fn push(&self, payload: impl Into<Bytes>) -> i64 {
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst) as i64;
        self.pending
            .lock()
            .push_back(InboundRecord::new(0, offset, payload));
        offset
    }

    /// Append an order serialized as JSON
    pub fn push_order(&self, order: &Order) -> Result<i64> {
        Ok(self.push(order.encode()?))
    }

    /// Records still waiting to be consumed
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Acknowledged records, in acknowledgement order
    pub fn acked(&self) -> Vec<InboundRecord> {
        self.acked.lock().clone()
    }

    /// Records that were handed back for redelivery
    pub fn redelivered(&self) -> Vec<InboundRecord> {
        self.redelivered.lock().clone()
    }
}

#[async_trait]
impl OrderStream for InMemoryOrderStream {
    async fn next(&self) -> Result<Option<InboundRecord>> {
        Ok(self.pending.lock().pop_front())
    }

    async fn ack(&self, record: &InboundRecord) -> Result<()> {
        self.acked.lock().push(record.clone());
        Ok(())
    }

    async fn redeliver(&self, record: &InboundRecord) -> Result<()> {
        self.redelivered.lock().push(record.clone());
        self.pending.lock().push_front(record.clone());
        Ok(())
    }
}
