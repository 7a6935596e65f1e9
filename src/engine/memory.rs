//! In-process memory tier.
//!
//! An explicit cache object owned by the source chain. Tests build their
//! own instance; nothing here is process-global.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::types::CacheEntry;

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot for `series_id`, fresh or not.
    pub async fn get(&self, series_id: &str) -> Option<CacheEntry> {
        self.entries.read().await.get(series_id).cloned()
    }

    pub async fn insert(&self, entry: CacheEntry) {
        self.entries
            .write()
            .await
            .insert(entry.series_id.clone(), entry);
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let n = entries.len();
        entries.clear();
        n
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove entries that are stale at `now`. Returns how many were dropped.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh_at(now));
        before - entries.len()
    }
}
