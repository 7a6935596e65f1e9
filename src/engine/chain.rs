//! Source chain executor.
//!
//! Resolves one series for one year range through the tiers:
//!
//! ```text
//! memory (fresh, covering) -> disk (fresh, covering) -> fetchers in order
//!     -> stale snapshot (degraded) -> NoDataAvailable
//! ```
//!
//! `force_refresh` skips both cache reads but still allows the stale
//! fallback. Fetchers run strictly one after another, each under its own
//! time box; a fetcher that times out or comes back empty just hands over
//! to the next one.

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::memory::MemoryCache;
use super::normalizer;
use crate::data::Fetcher;
use crate::error::LoadError;
use crate::storage::{self, CacheStore};
use crate::types::{CacheEntry, DataSource, LoadOutcome, SeriesDescriptor, Tier, YearRange};

// ---------------------------------------------------------------------------
// Settings & stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub ttl_secs: u64,
    /// Time box for a single fetcher attempt.
    pub fetch_timeout: Duration,
    pub serve_stale: bool,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            ttl_secs: crate::types::DEFAULT_TTL_SECS,
            fetch_timeout: Duration::from_secs(30),
            serve_stale: true,
        }
    }
}

/// Snapshot of the executor counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChainStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub live_fetches: u64,
    pub fetcher_misses: u64,
    pub cache_writes: u64,
    pub degraded: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    live_fetches: AtomicU64,
    fetcher_misses: AtomicU64,
    cache_writes: AtomicU64,
    degraded: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ChainStats {
        ChainStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            live_fetches: self.live_fetches.load(Ordering::Relaxed),
            fetcher_misses: self.fetcher_misses.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct SourceChain {
    memory: Arc<MemoryCache>,
    store: Arc<dyn CacheStore>,
    fetchers: Vec<Arc<dyn Fetcher>>,
    clock: Arc<dyn Clock>,
    settings: ChainSettings,
    /// Per-series locks so concurrent loads of one series share a fetch.
    inflight: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    counters: Counters,
}

impl SourceChain {
    pub fn new(
        memory: Arc<MemoryCache>,
        store: Arc<dyn CacheStore>,
        fetchers: Vec<Arc<dyn Fetcher>>,
        clock: Arc<dyn Clock>,
        settings: ChainSettings,
    ) -> Self {
        Self {
            memory,
            store,
            fetchers,
            clock,
            settings,
            inflight: std::sync::Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    pub fn store(&self) -> &dyn CacheStore {
        self.store.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    pub fn fetcher_names(&self) -> Vec<&'static str> {
        self.fetchers.iter().map(|f| f.name()).collect()
    }

    pub fn stats(&self) -> ChainStats {
        self.counters.snapshot()
    }

    fn series_lock(&self, series_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(series_id.to_string()).or_default().clone()
    }

    /// Drop the map's lock for `series_id` once no other caller holds it.
    fn release_lock(&self, series_id: &str, lock: &Arc<tokio::sync::Mutex<()>>) {
        let mut map = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Clones are only handed out under this mutex, so the count cannot grow here.
        let ours = map.get(series_id).is_some_and(|held| Arc::ptr_eq(held, lock));
        if ours && Arc::strong_count(lock) == 2 {
            map.remove(series_id);
        }
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn is_usable(&self, entry: &CacheEntry, range: &YearRange) -> bool {
        entry.is_fresh_at(self.clock.now()) && entry.covers(range)
    }

    /// Load `series` for `range`.
    pub async fn load(&self, series: &SeriesDescriptor, range: YearRange, force_refresh: bool) -> LoadOutcome {
        let lock = self.series_lock(&series.id);
        let outcome = {
            let _guard = lock.lock().await;
            self.load_locked(series, range, force_refresh).await
        };
        self.release_lock(&series.id, &lock);
        outcome
    }

    async fn load_locked(&self, series: &SeriesDescriptor, range: YearRange, force_refresh: bool) -> LoadOutcome {
        let mut stale: Option<CacheEntry> = None;

        if !force_refresh {
            // CHECK_MEMORY_CACHE
            if let Some(entry) = self.memory.get(&series.id).await {
                if self.is_usable(&entry, &range) {
                    Counters::bump(&self.counters.memory_hits);
                    debug!(series_id = %series.id, range = %range, "Memory cache hit");
                    return LoadOutcome::Success {
                        entry: entry.within(&range),
                        tier: Tier::Memory,
                    };
                }
                stale = Some(entry);
            }

            // CHECK_DISK_CACHE
            if let Some(entry) = self.read_disk(&series.id).await {
                if self.is_usable(&entry, &range) {
                    Counters::bump(&self.counters.disk_hits);
                    debug!(series_id = %series.id, range = %range, "Disk cache hit");
                    self.memory.insert(entry.clone()).await;
                    return LoadOutcome::Success {
                        entry: entry.within(&range),
                        tier: Tier::Disk,
                    };
                }
                stale = newer(stale, entry);
            }
            debug!(series_id = %series.id, range = %range, "Cache miss");
        }

        // FETCH_LIVE
        let mut attempted = Vec::with_capacity(self.fetchers.len());
        for fetcher in &self.fetchers {
            match self.try_fetcher(fetcher.as_ref(), series, range).await {
                Ok(entry) => {
                    Counters::bump(&self.counters.live_fetches);
                    info!(
                        series_id = %series.id,
                        fetcher = fetcher.name(),
                        points = entry.points.len(),
                        range = %range,
                        "Live fetch succeeded"
                    );
                    self.write_cache(&entry, series).await;
                    return LoadOutcome::Success { entry, tier: Tier::Live };
                }
                Err(reason) => {
                    Counters::bump(&self.counters.fetcher_misses);
                    attempted.push(format!("{}: {reason}", fetcher.name()));
                }
            }
        }

        // FALLBACK
        if self.settings.serve_stale {
            if force_refresh {
                if let Some(entry) = self.memory.get(&series.id).await {
                    stale = Some(entry);
                }
                if let Some(entry) = self.read_disk(&series.id).await {
                    stale = newer(stale, entry);
                }
            }

            if let Some(entry) = stale.map(|e| e.within(&range)).filter(|e| !e.points.is_empty()) {
                let staleness = entry.age(self.clock.now()).max(ChronoDuration::zero());
                Counters::bump(&self.counters.degraded);
                warn!(
                    series_id = %series.id,
                    range = %range,
                    stale_secs = staleness.num_seconds(),
                    "All sources failed, serving stale snapshot"
                );
                return LoadOutcome::Degraded { entry, staleness };
            }
        }

        Counters::bump(&self.counters.failures);
        warn!(series_id = %series.id, range = %range, attempted = ?attempted, "No data available");
        LoadOutcome::Failure(LoadError::NoDataAvailable {
            series_id: series.id.clone(),
            range,
            attempted,
        })
    }

    /// Run one fetcher under the time box and normalize its output.
    async fn try_fetcher(
        &self,
        fetcher: &dyn Fetcher,
        series: &SeriesDescriptor,
        range: YearRange,
    ) -> Result<CacheEntry, String> {
        let raw = match tokio::time::timeout(self.settings.fetch_timeout, fetcher.fetch(series, range)).await {
            Ok(raw) => raw,
            Err(_) => {
                warn!(
                    series_id = %series.id,
                    fetcher = fetcher.name(),
                    timeout_secs = self.settings.fetch_timeout.as_secs_f64(),
                    "Fetcher timed out"
                );
                return Err(format!("timed out after {:?}", self.settings.fetch_timeout));
            }
        };

        let raw_count = raw.len();
        let points: Vec<_> = normalizer::normalize(raw, series.frequency)
            .into_iter()
            .filter(|p| range.contains(p.year))
            .collect();

        if points.is_empty() {
            debug!(series_id = %series.id, fetcher = fetcher.name(), raw_count, "Fetcher returned no usable points");
            return Err(if raw_count == 0 {
                "no data".to_string()
            } else {
                format!("{raw_count} rows, none valid in {range}")
            });
        }

        Ok(CacheEntry {
            series_id: series.id.clone(),
            points,
            fetched_at: self.clock.now(),
            source: fetcher.source(),
            ttl_seconds: self.settings.ttl_secs,
            coverage: range,
        })
    }

    async fn read_disk(&self, series_id: &str) -> Option<CacheEntry> {
        match self.store.load_latest(series_id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(series_id, backend = self.store.backend(), error = %e, "Disk cache unreadable");
                None
            }
        }
    }

    /// Persist a live result. Synthetic data never enters either cache tier.
    async fn write_cache(&self, entry: &CacheEntry, series: &SeriesDescriptor) {
        if entry.source == DataSource::Synthetic {
            debug!(series_id = %entry.series_id, "Not caching synthetic data");
            return;
        }
        if storage::store(self.store.as_ref(), entry, series).await {
            Counters::bump(&self.counters.cache_writes);
        }
        self.memory.insert(entry.clone()).await;
    }

    /// Drop every cached snapshot (memory and disk).
    pub async fn clear(&self) -> anyhow::Result<(usize, usize)> {
        let memory = self.memory.clear().await;
        let disk = self.store.clear().await?;
        info!(memory, disk, "Caches cleared");
        Ok((memory, disk))
    }
}

fn newer(current: Option<CacheEntry>, candidate: CacheEntry) -> Option<CacheEntry> {
    match current {
        Some(existing) if existing.fetched_at >= candidate.fetched_at => Some(existing),
        _ => Some(candidate),
    }
}
