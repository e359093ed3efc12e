//! Service metrics
//!
//! Prometheus counters for ingestion, lookup and warm start. Each
//! [`ServiceMetrics`] owns its registry so independent instances (tests,
//! embedded use) never collide on metric names.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::Result;

/// Prometheus metrics for the whole service
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    ingest_total: IntCounterVec,
    lookup_total: IntCounterVec,
    warm_start_keys_total: IntCounterVec,
    cache_entries: IntGauge,
    consecutive_failures: IntGauge,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let ingest_total = IntCounterVec::new(
            Opts::new("ordercache_ingest_total", "Inbound records by outcome"),
            &["outcome"],
        )?;
        let lookup_total = IntCounterVec::new(
            Opts::new("ordercache_lookup_total", "Lookups by answering source"),
            &["source"],
        )?;
        let warm_start_keys_total = IntCounterVec::new(
            Opts::new(
                "ordercache_warm_start_keys_total",
                "Keys processed during warm start by result",
            ),
            &["result"],
        )?;
        let cache_entries = IntGauge::new("ordercache_cache_entries", "Entries held in the cache")?;
        let consecutive_failures = IntGauge::new(
            "ordercache_ingest_consecutive_failures",
            "Failed attempts in a row for the record being redelivered",
        )?;

        registry.register(Box::new(ingest_total.clone()))?;
        registry.register(Box::new(lookup_total.clone()))?;
        registry.register(Box::new(warm_start_keys_total.clone()))?;
        registry.register(Box::new(cache_entries.clone()))?;
        registry.register(Box::new(consecutive_failures.clone()))?;

        Ok(Self {
            registry,
            ingest_total,
            lookup_total,
            warm_start_keys_total,
            cache_entries,
            consecutive_failures,
        })
    }

    pub fn record_ingest(&self, outcome: &str) {
        self.ingest_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_lookup(&self, source: &str) {
        self.lookup_total.with_label_values(&[source]).inc();
    }

    pub fn record_warm_start_key(&self, result: &str) {
        self.warm_start_keys_total.with_label_values(&[result]).inc();
    }

    pub fn set_cache_entries(&self, entries: usize) {
        self.cache_entries.set(entries as i64);
    }

    pub fn set_consecutive_failures(&self, attempts: u64) {
        self.consecutive_failures
            .set(i64::try_from(attempts).unwrap_or(i64::MAX));
    }

    pub fn cache_entries(&self) -> i64 {
        self.cache_entries.get()
    }

    pub fn consecutive_failures(&self) -> i64 {
        self.consecutive_failures.get()
    }

    /// Counter value for one label; used by tests and diagnostics.
    pub fn ingest_count(&self, outcome: &str) -> u64 {
        self.ingest_total.with_label_values(&[outcome]).get()
    }

    pub fn lookup_count(&self, source: &str) -> u64 {
        self.lookup_total.with_label_values(&[source]).get()
    }

    pub fn warm_start_count(&self, result: &str) -> u64 {
        self.warm_start_keys_total.with_label_values(&[result]).get()
    }

    /// Encode all metrics in the Prometheus text format.
    ///
    /// Returns the content type alongside the body.
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl std::fmt::Debug for ServiceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMetrics").finish_non_exhaustive()
    }
}
