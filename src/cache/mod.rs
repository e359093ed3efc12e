//! Fingerprint Cache
//!
//! In-process projection of the store's keyspace, keyed by order identifier.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     FingerprintCache                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │   RwLock<HashMap<order_uid, CacheEntry>>                      │
//! │     ├── has / get / dump      (shared lock)                   │
//! │     └── set / delete / sweep  (exclusive lock)                │
//! │                                                               │
//! │   TTL sweeper task (interval = ttl / 2, cancelled on shutdown)│
//! └──────────────────────────────────────────────────────────────┘
//!        ▲                  ▲                      ▲
//!   Warm start        Ingestion (dedup)      Lookup (read-through)
//! ```
//!
//! Writers are the warm-start loader, the ingestion pipeline after a
//! successful persist, and the lookup service after a store hit.

mod entry;
mod fingerprint;

pub use entry::{CacheEntry, CacheHit, DumpEntry};
pub use fingerprint::{CacheConfig, CacheMode, CacheStats, FingerprintCache};
