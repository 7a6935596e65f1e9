//! JSON-file snapshot store.
//!
//! Layout inside the cache directory:
//! - `{id}_{YYYYMMDDTHHMMSSmmmZ}.json`: one per successful fetch
//! - `{id}_latest.json`: copy of the newest snapshot
//!
//! Every file is written to a hidden temp file first and renamed into
//! place, so concurrent writers for one series end as last-writer-wins
//! rather than a torn file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{reference_url, CacheStore};
use crate::types::{CacheEntry, Frequency, SeriesDescriptor};

const LATEST_SUFFIX: &str = "_latest.json";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

/// On-disk shape: the cache entry plus descriptive fields for humans.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    #[serde(flatten)]
    entry: CacheEntry,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    units: Option<String>,
    #[serde(default)]
    frequency: Option<Frequency>,
    #[serde(default)]
    source_url: Option<String>,
}

pub struct JsonFileStore {
    dir: PathBuf,
    keep_snapshots: usize,
}

impl JsonFileStore {
    pub async fn open(dir: impl AsRef<Path>, keep_snapshots: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        Ok(Self {
            dir,
            keep_snapshots: keep_snapshots.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn latest_path(&self, series_id: &str) -> PathBuf {
        self.dir.join(format!("{series_id}{LATEST_SUFFIX}"))
    }

    fn snapshot_path(&self, series_id: &str, at: DateTime<Utc>) -> PathBuf {
        self.dir
            .join(format!("{series_id}_{}.json", at.format(TIMESTAMP_FORMAT)))
    }

    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = self.dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e).with_context(|| format!("Failed to move snapshot into {}", path.display()));
        }
        Ok(())
    }

    /// Timestamped snapshot files for `series_id`, oldest first.
    async fn snapshots(&self, series_id: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{series_id}_");
        let mut found = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".json") && !name.ends_with(LATEST_SUFFIX) {
                found.push(item.path());
            }
        }
        found.sort();
        Ok(found)
    }

    /// Delete all but the newest `keep_snapshots` timestamped files.
    async fn prune(&self, series_id: &str) -> Result<usize> {
        let snapshots = self.snapshots(series_id).await?;
        let excess = snapshots.len().saturating_sub(self.keep_snapshots);
        for path in &snapshots[..excess] {
            tokio::fs::remove_file(path)
                .await
                .with_context(|| format!("Failed to prune {}", path.display()))?;
        }
        if excess > 0 {
            debug!(series_id, pruned = excess, "Pruned old snapshots");
        }
        Ok(excess)
    }

    async fn read_snapshot(path: &Path) -> Result<Option<CacheEntry>> {
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };
        let file: SnapshotFile = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
        Ok(Some(file.entry))
    }
}

fn validate_id(series_id: &str) -> Result<()> {
    if series_id.is_empty() || !series_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        anyhow::bail!("invalid series id for file cache: {series_id:?}");
    }
    Ok(())
}

#[async_trait]
impl CacheStore for JsonFileStore {
    fn backend(&self) -> &'static str {
        "json"
    }

    async fn load_latest(&self, series_id: &str) -> Result<Option<CacheEntry>> {
        validate_id(series_id)?;

        let latest_error = match Self::read_snapshot(&self.latest_path(series_id)).await {
            Ok(Some(entry)) => return Ok(Some(entry)),
            Ok(None) => None,
            Err(e) => {
                warn!(series_id, error = %e, "Latest pointer unreadable, trying snapshots");
                Some(e)
            }
        };

        // Newest intact timestamped snapshot wins.
        for path in self.snapshots(series_id).await?.iter().rev() {
            match Self::read_snapshot(path).await {
                Ok(Some(entry)) => {
                    warn!(series_id, path = %path.display(), "Using newest snapshot in place of latest pointer");
                    return Ok(Some(entry));
                }
                Ok(None) => {}
                Err(e) => warn!(series_id, error = %e, "Skipping unreadable snapshot"),
            }
        }

        match latest_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    async fn save(&self, entry: &CacheEntry, series: &SeriesDescriptor) -> Result<()> {
        validate_id(&entry.series_id)?;

        let file = SnapshotFile {
            entry: entry.clone(),
            title: Some(series.title.clone()),
            units: Some(series.units.clone()),
            frequency: Some(series.frequency),
            source_url: Some(reference_url(series)),
        };
        let bytes = serde_json::to_vec_pretty(&file).context("Failed to serialise snapshot")?;

        self.write_atomic(&self.snapshot_path(&entry.series_id, entry.fetched_at), &bytes)
            .await?;
        self.write_atomic(&self.latest_path(&entry.series_id), &bytes)
            .await?;

        if let Err(e) = self.prune(&entry.series_id).await {
            warn!(series_id = %entry.series_id, error = %e, "Snapshot pruning failed");
        }
        Ok(())
    }

    async fn list_series(&self) -> Result<Vec<String>> {
        let mut ids = BTreeSet::new();
        let mut dir = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            if let Some((id, _)) = name.split_once('_') {
                if validate_id(id).is_ok() {
                    ids.insert(id.to_string());
                }
            }
        }
        Ok(ids.into_iter().collect())
    }

    async fn clear(&self) -> Result<usize> {
        let ids = self.list_series().await?;
        for id in &ids {
            for path in self.snapshots(id).await? {
                tokio::fs::remove_file(&path)
                    .await
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            match tokio::fs::remove_file(self.latest_path(id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e).context("Failed to remove latest pointer"),
            }
        }
        Ok(ids.len())
    }
}
