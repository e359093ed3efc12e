//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! The core depends on two external collaborators: the durable store and the
//! inbound message stream. Both are expressed as traits here and implemented
//! by the adapters module.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │          OrderStore        │       OrderStream       │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  PostgresOrderStore │ KafkaOrderStream │ InMemory*  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use super::order::{Order, OrderId};
use crate::error::Result;

// =============================================================================
// Store Port
// =============================================================================

/// Result of an insert-or-ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The order was written by this call
    Inserted,
    /// A record with the same identifier already existed; nothing was written
    AlreadyPresent,
}

/// Port for durable order persistence.
///
/// The store is authoritative; the cache is a rebuildable projection of its
/// keyspace. `save_if_absent` must be idempotent per identifier: the first
/// writer wins and later calls are no-ops, not errors.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist the order unless one with the same identifier exists.
    async fn save_if_absent(&self, order: &Order) -> Result<SaveOutcome>;

    /// Fetch a full order. `Ok(None)` means confirmed absent.
    async fn fetch(&self, id: &OrderId) -> Result<Option<Order>>;

    /// List every persisted identifier (warm start).
    async fn list_ids(&self) -> Result<Vec<OrderId>>;

    /// Mirror a serialized payload durably. Stores without a mirror ignore it.
    async fn cache_blob(&self, _id: &OrderId, _blob: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Read a mirrored payload. `Ok(None)` when there is none.
    async fn fetch_blob(&self, _id: &OrderId) -> Result<Option<Bytes>> {
        Ok(None)
    }

    /// Check if the store is reachable.
    async fn health_check(&self) -> Result<()>;
}

// =============================================================================
// Stream Port
// =============================================================================

/// One delivery from the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

impl InboundRecord {
    pub fn new(partition: i32, offset: i64, payload: impl Into<Bytes>) -> Self {
        Self {
            partition,
            offset,
            key: None,
            payload: payload.into(),
        }
    }
}

/// Port for the at-least-once inbound stream.
///
/// Consumption progress advances only through [`OrderStream::ack`]. A record
/// handed to [`OrderStream::redeliver`] must come back from a later `next`.
#[async_trait]
pub trait OrderStream: Send + Sync {
    /// Wait for the next record. `Ok(None)` when nothing is available right now;
    /// callers bound the wait with their own poll timeout.
    async fn next(&self) -> Result<Option<InboundRecord>>;

    /// Commit consumption of a record.
    async fn ack(&self, record: &InboundRecord) -> Result<()>;

    /// Leave a record uncommitted and arrange for it to be delivered again.
    async fn redeliver(&self, record: &InboundRecord) -> Result<()>;
}
