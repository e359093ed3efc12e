//! Order Cache - deduplicating order ingestion with a read-through lookup cache
//!
//! Consumes order records from a message stream, persists each order exactly
//! once in PostgreSQL, and answers point lookups over HTTP from an in-memory
//! cache that falls back to the store on a miss.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────┐
//!   boot ───────────▶│ Warm-Start Loader│───────────┐
//!                    └──────────────────┘           ▼
//! ┌────────┐   ┌────────────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ Stream │──▶│ Ingestion Pipeline │──▶│ Fingerprint Cache│◀──│ Lookup (HTTP)│
//! └────────┘   └────────────────────┘   └──────────────────┘   └──────────────┘
//!                        │                                            │
//!                        ▼                                            ▼
//!                    ┌──────────────────────────────────────────────────┐
//!                    │              Order Store (PostgreSQL)            │
//!                    └──────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Store and stream adapters implementing domain ports
//! - [`cache`] - Concurrent fingerprint cache with optional TTL
//! - [`domain`] - Order aggregate and ports (DDD)
//! - [`error`] - Error types
//! - [`generator`] - Sample order generator
//! - [`ingest`] - Stream ingestion pipeline
//! - [`lookup`] - Lookup service and HTTP endpoint
//! - [`metrics`] - Prometheus metrics
//! - [`server`] - HTTP accept loop, health and metrics endpoints
//! - [`warmup`] - Warm-start loader

pub mod adapters;
pub mod cache;
pub mod domain;
pub mod error;
pub mod generator;
pub mod ingest;
pub mod lookup;
pub mod metrics;
pub mod server;
pub mod warmup;

// Re-export commonly used types
pub use cache::{CacheConfig, CacheMode, FingerprintCache};
pub use domain::{Order, OrderId, OrderStore, OrderStream};
pub use error::{Error, Result};
pub use ingest::{IngestConfig, IngestionPipeline};
pub use lookup::{LookupConfig, LookupHandler, LookupService};
pub use metrics::ServiceMetrics;
pub use warmup::{WarmStartConfig, WarmStartLoader};
