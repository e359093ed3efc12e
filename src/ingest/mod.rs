//! Ingestion
//!
//! Folds inbound stream records into the store and the cache, deduplicating
//! at-least-once deliveries.

mod pipeline;

pub use pipeline::{IngestConfig, IngestOutcome, IngestionPipeline};
