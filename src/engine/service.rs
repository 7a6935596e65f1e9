//! Friendly-ticker façade over the source chain.
//!
//! Callers pick the output shape by method: `load_raw` returns the legacy
//! point list, `load_envelope` the standardized response. Multi-series
//! requests fan out over a bounded number of concurrent loads, and each
//! series degrades on its own.

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::alerts::{self, AlertReport, AlertThresholds, ChangeAlert, Comparison, IndicatorLatest};
use super::chain::{ChainSettings, ChainStats, SourceChain};
use super::clock::{Clock, SystemClock};
use super::memory::MemoryCache;
use super::normalizer;
use crate::catalog::SeriesCatalog;
use crate::config::AppConfig;
use crate::daterange::{default_range, parse_year_range};
use crate::data::bls_api::BlsApiFetcher;
use crate::data::bls_table::BlsTableFetcher;
use crate::data::fred_api::FredApiFetcher;
use crate::data::fred_csv::FredCsvFetcher;
use crate::data::http::SourceClient;
use crate::data::synthetic::SyntheticFetcher;
use crate::data::Fetcher;
use crate::error::LoadError;
use crate::storage;
use crate::types::{
    DataPoint, DataSource, LoadOutcome, Quality, ResponseMetadata, SeriesDescriptor,
    StandardizedResponse, YearRange,
};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Short description of a series' recent history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub series_id: String,
    pub title: String,
    pub units: String,
    pub total_points: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub latest_value: Option<f64>,
    pub latest_period: Option<String>,
    /// Distinct years present, ascending.
    pub years: Vec<i32>,
    pub quality: Option<Quality>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    #[serde(flatten)]
    pub chain: ChainStats,
    pub memory_entries: usize,
    pub cache_backend: &'static str,
    pub fetchers: Vec<&'static str>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct DataService {
    catalog: Arc<SeriesCatalog>,
    chain: Arc<SourceChain>,
    api_version: String,
    max_workers: usize,
    alert_thresholds: AlertThresholds,
}

impl DataService {
    pub fn new(catalog: Arc<SeriesCatalog>, chain: Arc<SourceChain>, api_version: impl Into<String>, max_workers: usize) -> Self {
        Self {
            catalog,
            chain,
            api_version: api_version.into(),
            max_workers: max_workers.max(1),
            alert_thresholds: AlertThresholds::default(),
        }
    }

    pub fn with_alert_thresholds(mut self, thresholds: AlertThresholds) -> Self {
        self.alert_thresholds = thresholds;
        self
    }

    /// Wire the full stack from configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let client = Arc::new(SourceClient::new(config.http_settings())?);
        let fetchers = build_fetchers(config, client)?;
        let store = storage::open(&config.cache).await?;

        let chain = SourceChain::new(
            Arc::new(MemoryCache::new()),
            store,
            fetchers,
            Arc::new(SystemClock),
            ChainSettings {
                ttl_secs: config.cache.ttl_secs,
                fetch_timeout: Duration::from_secs(config.loader.fetch_timeout_secs),
                serve_stale: config.cache.serve_stale,
            },
        );
        info!(fetchers = ?chain.fetcher_names(), "Source chain ready");

        Ok(Self::new(
            Arc::new(SeriesCatalog::new()),
            Arc::new(chain),
            config.service.api_version.clone(),
            config.loader.max_workers,
        )
        .with_alert_thresholds(config.alerts))
    }

    pub fn catalog(&self) -> &SeriesCatalog {
        &self.catalog
    }

    pub fn chain(&self) -> &SourceChain {
        &self.chain
    }

    fn current_year(&self) -> i32 {
        self.chain.clock().now().year()
    }

    /// Parse a date-range expression relative to the service clock.
    pub fn resolve_range(&self, date_range: Option<&str>) -> YearRange {
        parse_year_range(date_range, self.current_year())
    }

    async fn load(&self, ticker: &str, range: YearRange, force_refresh: bool) -> Result<(SeriesDescriptor, LoadOutcome), LoadError> {
        let series = self.catalog.resolve(ticker)?;
        let outcome = self.chain.load(&series, range, force_refresh).await;
        Ok((series, outcome))
    }

    /// Legacy shape: the points alone, newest first.
    pub async fn load_raw(&self, ticker: &str, date_range: Option<&str>, force_refresh: bool) -> Result<Vec<DataPoint>, LoadError> {
        let range = self.resolve_range(date_range);
        let (_, outcome) = self.load(ticker, range, force_refresh).await?;
        Ok(outcome.into_result()?.points)
    }

    /// Standardized envelope with derived metrics and metadata.
    pub async fn load_envelope(&self, ticker: &str, date_range: Option<&str>, force_refresh: bool) -> StandardizedResponse {
        let started = Instant::now();
        let range = self.resolve_range(date_range);

        let (series, outcome) = match self.load(ticker, range, force_refresh).await {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(ticker, error = %e, "Unknown series requested");
                return StandardizedResponse::failure(&e, None, self.metadata(started));
            }
        };

        let mut metadata = self.metadata(started);
        metadata.quality = outcome.quality();

        match outcome {
            LoadOutcome::Success { entry, tier } => {
                metadata.source = Some(entry.source);
                metadata.tier = Some(tier);
                if entry.source != DataSource::Synthetic {
                    metadata.cache_expires = Some(entry.expires_at());
                }
                let data = normalizer::enrich(&entry.points, series.frequency);
                StandardizedResponse::success(data, series, metadata)
            }
            LoadOutcome::Degraded { entry, staleness } => {
                metadata.source = Some(DataSource::Cached);
                metadata.stale_seconds = Some(staleness.num_seconds());
                let data = normalizer::enrich(&entry.points, series.frequency);
                StandardizedResponse::success(data, series, metadata)
            }
            LoadOutcome::Failure(e) => StandardizedResponse::failure(&e, Some(series), metadata),
        }
    }

    fn metadata(&self, started: Instant) -> ResponseMetadata {
        ResponseMetadata {
            timestamp: self.chain.clock().now(),
            source: None,
            quality: None,
            tier: None,
            latency_ms: started.elapsed().as_millis() as u64,
            total_points: 0,
            api_version: self.api_version.clone(),
            cache_expires: None,
            stale_seconds: None,
        }
    }

    /// Load several tickers concurrently. Order of results is not guaranteed.
    pub async fn load_many(&self, tickers: &[String], date_range: Option<&str>) -> Vec<(String, StandardizedResponse)> {
        stream::iter(tickers.iter().cloned())
            .map(|ticker| async move {
                let response = self.load_envelope(&ticker, date_range, false).await;
                (ticker, response)
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await
    }

    /// Newest `n` points from the default window.
    pub async fn latest(&self, ticker: &str, n: usize) -> Result<Vec<DataPoint>, LoadError> {
        let range = default_range(self.current_year());
        let (_, outcome) = self.load(ticker, range, false).await?;
        let mut points = outcome.into_result()?.points;
        points.truncate(n);
        Ok(points)
    }

    pub async fn summary(&self, ticker: &str) -> Result<SeriesSummary, LoadError> {
        let range = default_range(self.current_year());
        let (series, outcome) = self.load(ticker, range, false).await?;
        let quality = outcome.quality();
        let points = outcome.into_result()?.points;

        let mut years: Vec<i32> = points.iter().map(|p| p.year).collect();
        years.sort_unstable();
        years.dedup();

        Ok(SeriesSummary {
            series_id: series.id,
            title: series.title,
            units: series.units,
            total_points: points.len(),
            first_date: points.last().map(|p| p.date),
            last_date: points.first().map(|p| p.date),
            latest_value: points.first().map(|p| p.value),
            latest_period: points.first().map(|p| p.period.clone()),
            years,
            quality,
        })
    }

    /// Rate the newest period-over-period move of each ticker.
    pub async fn alerts(&self, tickers: &[String]) -> AlertReport {
        let range = default_range(self.current_year());
        let loaded: Vec<(String, Result<(SeriesDescriptor, Vec<DataPoint>), LoadError>)> =
            stream::iter(tickers.iter().cloned())
                .map(|ticker| async move {
                    let loaded = match self.load(&ticker, range, false).await {
                        Ok((series, outcome)) => outcome.into_result().map(|e| (series, e.points)),
                        Err(e) => Err(e),
                    };
                    (ticker, loaded)
                })
                .buffer_unordered(self.max_workers)
                .collect()
                .await;

        let mut found = Vec::new();
        let mut unavailable = Vec::new();
        for (ticker, result) in &loaded {
            match result {
                Ok((series, points)) => {
                    found.extend(alerts::check_change(ticker, series, points, &self.alert_thresholds));
                }
                Err(e) => {
                    debug!(ticker = %ticker, error = %e, "Skipping alert check");
                    unavailable.push(ticker.clone());
                }
            }
        }

        let report = AlertReport::new(tickers.len(), found, unavailable);
        info!(
            checked = report.checked,
            alerts = report.alerts.len(),
            critical = report.critical,
            "Change alerts evaluated"
        );
        report
    }

    /// Alerts for envelopes that were already loaded, e.g. by `load_many`.
    pub fn alerts_for(&self, responses: &[(String, StandardizedResponse)]) -> Vec<ChangeAlert> {
        responses
            .iter()
            .filter(|(_, r)| r.success)
            .filter_map(|(ticker, r)| {
                let series = r.series.as_ref()?;
                let points: Vec<DataPoint> = r.data.iter().map(|e| e.point.clone()).collect();
                alerts::check_change(ticker, series, &points, &self.alert_thresholds)
            })
            .collect()
    }

    /// Latest values of `a` and `b` side by side.
    pub async fn compare(&self, a: &str, b: &str) -> Result<Comparison, LoadError> {
        let range = default_range(self.current_year());
        let (left, right) = tokio::join!(self.load(a, range, false), self.load(b, range, false));
        let (series_a, outcome_a) = left?;
        let (series_b, outcome_b) = right?;
        let points_a = outcome_a.into_result()?.points;
        let points_b = outcome_b.into_result()?.points;

        Ok(Comparison::new(
            IndicatorLatest::new(a, &series_a, &points_a),
            IndicatorLatest::new(b, &series_b, &points_b),
        ))
    }

    /// Preload tickers; failures are logged only. Returns how many loaded.
    pub async fn warmup(&self, tickers: &[String]) -> usize {
        if tickers.is_empty() {
            return 0;
        }
        let results = self.load_many(tickers, None).await;
        let loaded = results.iter().filter(|(_, r)| r.success).count();
        for (ticker, response) in results.iter().filter(|(_, r)| !r.success) {
            warn!(ticker = %ticker, error = ?response.error, "Warmup load failed");
        }
        info!(loaded, requested = tickers.len(), "Warmup complete");
        loaded
    }

    /// Drop expired entries from the memory tier. Disk snapshots stay as
    /// stale fallbacks.
    pub async fn evict_expired(&self) -> usize {
        let evicted = self.chain.memory().evict_expired(self.chain.clock().now()).await;
        if evicted > 0 {
            debug!(evicted, "Evicted expired memory entries");
        }
        evicted
    }

    pub async fn clear_cache(&self) -> Result<(usize, usize)> {
        self.chain.clear().await.context("Failed to clear caches")
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            chain: self.chain.stats(),
            memory_entries: self.chain.memory().len().await,
            cache_backend: self.chain.store().backend(),
            fetchers: self.chain.fetcher_names(),
        }
    }
}

/// Build fetchers in configured order. Unknown names are a config error.
pub fn build_fetchers(config: &AppConfig, client: Arc<SourceClient>) -> Result<Vec<Arc<dyn Fetcher>>> {
    let sources = &config.sources;
    let mut fetchers: Vec<Arc<dyn Fetcher>> = Vec::with_capacity(sources.order.len() + 1);

    for name in &sources.order {
        let fetcher: Arc<dyn Fetcher> = match name.as_str() {
            "fred_api" => Arc::new(FredApiFetcher::new(client.clone(), &sources.fred_api_url, config.fred_api_key())),
            "bls_api" => Arc::new(BlsApiFetcher::new(client.clone(), &sources.bls_api_url, config.bls_api_key())),
            "fred_csv" => Arc::new(FredCsvFetcher::new(client.clone(), &sources.fred_csv_url)),
            "bls_table" => Arc::new(BlsTableFetcher::new(client.clone(), &sources.bls_table_url)),
            "synthetic" => Arc::new(SyntheticFetcher),
            other => anyhow::bail!("unknown fetcher in sources.order: {other}"),
        };
        fetchers.push(fetcher);
    }

    let has_synthetic = sources.order.iter().any(|n| n == "synthetic");
    if sources.allow_synthetic && !has_synthetic {
        fetchers.push(Arc::new(SyntheticFetcher));
    } else if !sources.allow_synthetic && has_synthetic {
        warn!("'synthetic' listed in sources.order but allow_synthetic is false; dropping it");
        fetchers.retain(|f| f.name() != "synthetic");
    }
    Ok(fetchers)
}
