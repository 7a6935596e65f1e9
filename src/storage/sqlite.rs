//! SQLite snapshot store.
//!
//! Schema:
//! - `series_metadata(series_id PK, title, units, frequency, last_updated, source_url, ...)`
//! - `data_points(series_id FK, date, value, period, year, month, UNIQUE(series_id, date))`
//!
//! A save replaces the series' points inside one transaction, so readers
//! see either the previous snapshot or the new one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::{reference_url, CacheStore};
use crate::types::{CacheEntry, DataPoint, DataSource, SeriesDescriptor, YearRange};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS series_metadata (
        series_id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        units TEXT NOT NULL,
        frequency TEXT NOT NULL,
        last_updated TEXT NOT NULL,
        source_url TEXT,
        source TEXT NOT NULL,
        ttl_seconds INTEGER NOT NULL,
        coverage_start INTEGER NOT NULL,
        coverage_end INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS data_points (
        series_id TEXT NOT NULL REFERENCES series_metadata(series_id) ON DELETE CASCADE,
        date TEXT NOT NULL,
        value REAL NOT NULL,
        period TEXT NOT NULL,
        year INTEGER NOT NULL,
        month INTEGER,
        UNIQUE(series_id, date)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_data_points_series_date ON data_points(series_id, date DESC)",
];

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) a database file.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite cache at {}", path.display()))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(path = %path.display(), "SQLite cache initialised");
        Ok(store)
    }

    /// Private in-memory database, used by tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("Invalid in-memory SQLite URL")?
            .foreign_keys(true);
        // One connection: every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite")?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to initialise SQLite schema")?;
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn load_latest(&self, series_id: &str) -> Result<Option<CacheEntry>> {
        let Some(meta) = sqlx::query(
            "SELECT last_updated, source, ttl_seconds, coverage_start, coverage_end \
             FROM series_metadata WHERE series_id = ?1",
        )
        .bind(series_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to read metadata for {series_id}"))?
        else {
            return Ok(None);
        };

        let last_updated: String = meta.try_get("last_updated")?;
        let fetched_at = DateTime::parse_from_rfc3339(&last_updated)
            .with_context(|| format!("Bad last_updated for {series_id}: {last_updated}"))?
            .with_timezone(&Utc);
        let source: String = meta.try_get("source")?;
        let ttl_seconds: i64 = meta.try_get("ttl_seconds")?;
        let coverage = YearRange::new(meta.try_get("coverage_start")?, meta.try_get("coverage_end")?);

        let rows = sqlx::query(
            "SELECT date, value, period, year, month FROM data_points \
             WHERE series_id = ?1 ORDER BY date DESC",
        )
        .bind(series_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to read points for {series_id}"))?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            let date: String = row.try_get("date")?;
            let month: Option<i64> = row.try_get("month")?;
            points.push(DataPoint {
                date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .with_context(|| format!("Bad stored date {date}"))?,
                value: row.try_get("value")?,
                period: row.try_get("period")?,
                year: row.try_get::<i64, _>("year")? as i32,
                month: month.map(|m| m as u32),
            });
        }

        Ok(Some(CacheEntry {
            series_id: series_id.to_string(),
            points,
            fetched_at,
            source: source.parse()?,
            ttl_seconds: ttl_seconds.max(0) as u64,
            coverage,
        }))
    }

    async fn save(&self, entry: &CacheEntry, series: &SeriesDescriptor) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO series_metadata
                (series_id, title, units, frequency, last_updated, source_url,
                 source, ttl_seconds, coverage_start, coverage_end)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(series_id) DO UPDATE SET
                title = excluded.title,
                units = excluded.units,
                frequency = excluded.frequency,
                last_updated = excluded.last_updated,
                source_url = excluded.source_url,
                source = excluded.source,
                ttl_seconds = excluded.ttl_seconds,
                coverage_start = excluded.coverage_start,
                coverage_end = excluded.coverage_end
            "#,
        )
        .bind(&entry.series_id)
        .bind(&series.title)
        .bind(&series.units)
        .bind(series.frequency.to_string())
        .bind(entry.fetched_at.to_rfc3339())
        .bind(reference_url(series))
        .bind(entry.source.as_str())
        .bind(entry.ttl_seconds as i64)
        .bind(entry.coverage.start)
        .bind(entry.coverage.end)
        .execute(&mut *tx)
        .await
        .context("Failed to upsert series metadata")?;

        sqlx::query("DELETE FROM data_points WHERE series_id = ?1")
            .bind(&entry.series_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear old points")?;

        for point in &entry.points {
            sqlx::query(
                "INSERT OR REPLACE INTO data_points (series_id, date, value, period, year, month) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(&entry.series_id)
            .bind(point.date.format("%Y-%m-%d").to_string())
            .bind(point.value)
            .bind(&point.period)
            .bind(point.year)
            .bind(point.month.map(i64::from))
            .execute(&mut *tx)
            .await
            .context("Failed to insert data point")?;
        }

        tx.commit().await.context("Failed to commit snapshot")?;
        Ok(())
    }

    async fn list_series(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT series_id FROM series_metadata ORDER BY series_id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list series")?;
        Ok(ids)
    }

    async fn clear(&self) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM data_points").execute(&mut *tx).await?;
        let removed = sqlx::query("DELETE FROM series_metadata")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed as usize)
    }
}

#[cfg(test)]
impl SqliteStore {
    async fn point_count(&self, series_id: &str) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM data_points WHERE series_id = ?1")
            .bind(series_id)
            .fetch_one(&self.pool)
            .await?)
    }
}
