//! Fingerprint Cache - in-process order presence/payload store
//!
//! # Design
//!
//! - One `parking_lot::RwLock` around the whole key space: `has`/`get`/`dump`
//!   share it, `set`/`delete`/sweep take it exclusively
//! - No operation performs I/O while holding the lock
//! - Under TTL mode every read re-validates age, so a late sweep never yields
//!   a stale hit; the background sweep only reclaims memory

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::entry::{CacheEntry, CacheHit, DumpEntry};
use crate::error::{Error, Result};

/// Shortest interval the sweeper will run at
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// What the cache keeps per identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CacheMode {
    /// Existence marker only
    Presence,
    /// Serialized order payload
    #[default]
    Payload,
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheMode::Presence => write!(f, "presence"),
            CacheMode::Payload => write!(f, "payload"),
        }
    }
}

/// Fingerprint cache configuration
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Presence-only or payload-carrying entries
    pub mode: CacheMode,
    /// Entry time-to-live (None = entries never expire)
    pub ttl: Option<Duration>,
}

impl CacheConfig {
    /// Sweep cadence: half the TTL, never below one second.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.ttl.map(|ttl| (ttl / 2).max(MIN_SWEEP_INTERVAL))
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Stored entries, including expired ones not yet swept
    pub entries: usize,
    /// Lookups that found a live entry
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Entries reclaimed by the sweeper
    pub expirations: u64,
}

struct CacheShared {
    entries: RwLock<HashMap<String, CacheEntry>>,
    mode: CacheMode,
    ttl: Option<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
}

impl CacheShared {
    fn lookup(&self, key: &str) -> Option<CacheHit> {
        let now = Instant::now();
        let entries = self.entries.read();

        let hit = entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(self.ttl, now))
            .map(|entry| match entry.payload() {
                Some(payload) => CacheHit::Payload(payload.clone()),
                None => CacheHit::Present,
            });

        match hit {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    fn sweep(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let now = Instant::now();

        let (removed, remaining) = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired_at(Some(ttl), now));
            (before - entries.len(), entries.len())
        };

        if removed > 0 {
            self.expirations.fetch_add(removed as u64, Ordering::Relaxed);
            info!(expired = removed, remaining, "Cache cleanup completed");
        }
        removed
    }
}

/// Concurrent order cache shared by ingestion, lookup and warm start.
///
/// Presence in the cache means the identifier was confirmed persisted at some
/// point. Absence means nothing: callers must consult the store before
/// reporting an order as missing.
pub struct FingerprintCache {
    shared: Arc<CacheShared>,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl FingerprintCache {
    /// Create a cache. Under TTL mode this starts the background sweep, which
    /// requires a Tokio runtime.
    pub fn new(config: CacheConfig) -> Result<Arc<Self>> {
        let shared = Arc::new(CacheShared {
            entries: RwLock::new(HashMap::new()),
            mode: config.mode,
            ttl: config.ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        });
        let shutdown = CancellationToken::new();

        let sweeper = match config.sweep_interval() {
            Some(period) => {
                let handle = tokio::runtime::Handle::try_current().map_err(|_| {
                    Error::Config("cache TTL sweep requires a Tokio runtime".to_string())
                })?;
                Some(handle.spawn(run_sweeper(
                    Arc::clone(&shared),
                    period,
                    shutdown.clone(),
                )))
            }
            None => None,
        };

        Ok(Arc::new(Self {
            shared,
            shutdown,
            sweeper: Mutex::new(sweeper),
        }))
    }

    /// Cache without TTL, for callers outside a runtime
    pub fn unbounded(mode: CacheMode) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(CacheShared {
                entries: RwLock::new(HashMap::new()),
                mode,
                ttl: None,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                expirations: AtomicU64::new(0),
            }),
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        })
    }

    /// Insert or replace an entry. The payload is dropped in presence mode.
    pub fn set(&self, key: impl Into<String>, payload: Option<Bytes>) {
        let key = key.into();
        let payload = match self.shared.mode {
            CacheMode::Payload => payload,
            CacheMode::Presence => None,
        };

        debug!(key = %key, bytes = payload.as_ref().map_or(0, Bytes::len), "Cache updated");
        self.shared
            .entries
            .write()
            .insert(key, CacheEntry::new(payload));
    }

    /// True if a live entry exists for `key`.
    pub fn has(&self, key: &str) -> bool {
        self.shared.lookup(key).is_some()
    }

    /// Get the live entry for `key`.
    pub fn get(&self, key: &str) -> Option<CacheHit> {
        self.shared.lookup(key)
    }

    /// Remove an entry. Removing an absent key is a no-op.
    pub fn delete(&self, key: &str) {
        if self.shared.entries.write().remove(key).is_some() {
            debug!(key = %key, "Removed from cache");
        }
    }

    /// Snapshot of all live entries, ordered by key.
    pub fn dump(&self) -> Vec<DumpEntry> {
        let now = Instant::now();
        let mut snapshot: Vec<DumpEntry> = {
            let entries = self.shared.entries.read();
            entries
                .iter()
                .filter(|(_, entry)| !entry.is_expired_at(self.shared.ttl, now))
                .map(|(key, entry)| DumpEntry {
                    key: key.clone(),
                    age: entry.age_at(now),
                    payload_bytes: entry.size(),
                })
                .collect()
        };
        snapshot.sort_by(|a, b| a.key.cmp(&b.key));
        snapshot
    }

    /// Log the cache content summary (debug level lists every key).
    pub fn log_content(&self) {
        let snapshot = self.dump();
        info!(count = snapshot.len(), mode = %self.shared.mode, "Current cache content");
        for entry in &snapshot {
            debug!(key = %entry.key, age = ?entry.age, bytes = entry.payload_bytes, "Cache item");
        }
    }

    /// Reclaim expired entries now. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.shared.sweep()
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.shared.entries.read().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entry mode
    pub fn mode(&self) -> CacheMode {
        self.shared.mode
    }

    /// Configured TTL
    pub fn ttl(&self) -> Option<Duration> {
        self.shared.ttl
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
            expirations: self.shared.expirations.load(Ordering::Relaxed),
        }
    }

    /// Stop the background sweep and wait for it to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Cache sweeper task failed");
            }
        }
    }
}

impl Drop for FingerprintCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for FingerprintCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintCache")
            .field("mode", &self.shared.mode)
            .field("ttl", &self.shared.ttl)
            .field("entries", &self.len())
            .finish()
    }
}

async fn run_sweeper(shared: Arc<CacheShared>, period: Duration, shutdown: CancellationToken) {
    debug!(?period, "Starting cache sweeper");
    let mut tick = tokio::time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Cache sweeper shutting down");
                break;
            }
            _ = tick.tick() => {
                shared.sweep();
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
