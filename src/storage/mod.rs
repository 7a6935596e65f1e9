//! Persistence layer for series snapshots.
//!
//! Two interchangeable backends behind `CacheStore`:
//! - `json`: one file per fetch (`{id}_{timestamp}.json`) plus `{id}_latest.json`
//! - `sqlite`: `series_metadata` + `data_points` tables
//!
//! Writers never expire anything; TTL is decided by the reader.

pub mod json;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::CacheConfig;
use crate::types::{CacheEntry, SeriesDescriptor};

pub use json::JsonFileStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Json,
    Sqlite,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Backend name for logs and `/stats`.
    fn backend(&self) -> &'static str;

    /// Most recent snapshot for `series_id`, regardless of age.
    async fn load_latest(&self, series_id: &str) -> Result<Option<CacheEntry>>;

    /// Persist `entry` atomically and make it the latest snapshot.
    async fn save(&self, entry: &CacheEntry, series: &SeriesDescriptor) -> Result<()>;

    /// Series ids with at least one snapshot.
    async fn list_series(&self) -> Result<Vec<String>>;

    /// Remove every snapshot. Returns how many series were removed.
    async fn clear(&self) -> Result<usize>;
}

/// Write `entry`, logging instead of failing. Returns whether it was persisted.
pub async fn store(store: &dyn CacheStore, entry: &CacheEntry, series: &SeriesDescriptor) -> bool {
    match store.save(entry, series).await {
        Ok(()) => {
            debug!(
                series_id = %entry.series_id,
                points = entry.points.len(),
                source = %entry.source,
                backend = store.backend(),
                "Snapshot written"
            );
            true
        }
        Err(e) => {
            error!(series_id = %entry.series_id, backend = store.backend(), error = %e, "Failed to write snapshot");
            false
        }
    }
}

/// Public web page for a series, recorded alongside each snapshot.
pub fn reference_url(series: &SeriesDescriptor) -> String {
    match &series.bls_id {
        Some(bls_id) => format!("https://data.bls.gov/timeseries/{bls_id}"),
        None => format!("https://fred.stlouisfed.org/series/{}", series.id),
    }
}

/// Open the configured backend.
pub async fn open(config: &CacheConfig) -> Result<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match config.backend {
        StorageBackend::Json => Arc::new(JsonFileStore::open(&config.dir, config.keep_snapshots).await?),
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&config.sqlite_path()).await?),
    };
    info!(backend = store.backend(), dir = %config.dir.display(), "Cache store ready");
    Ok(store)
}
