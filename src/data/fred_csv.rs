//! FRED bulk CSV export fetcher.
//!
//! URL: `https://fred.stlouisfed.org/graph/fredgraph.csv?id=CPIAUCSL&cosd=2023-01-01&coed=2024-12-31`
//! No key needed. Missing observations are printed as `.`; those are
//! passed through and dropped by the normalizer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use super::http::{RequestProfile, SourceClient};
use super::{within_range, Fetcher, RawObservation};
use crate::types::{DataSource, SeriesDescriptor, YearRange};

pub const DEFAULT_BASE_URL: &str = "https://fred.stlouisfed.org";

pub struct FredCsvFetcher {
    client: Arc<SourceClient>,
    base_url: String,
}

impl FredCsvFetcher {
    pub fn new(client: Arc<SourceClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn csv_url(&self, series_id: &str, range: &YearRange) -> String {
        format!(
            "{}/graph/fredgraph.csv?id={}&cosd={}&coed={}",
            self.base_url,
            urlencoding::encode(series_id),
            range.start_date(),
            range.end_date(),
        )
    }

    async fn try_fetch(&self, series: &SeriesDescriptor, range: YearRange) -> Result<Vec<RawObservation>> {
        let url = self.csv_url(&series.id, &range);
        let body = self
            .client
            .get_text(&url, RequestProfile::Browser)
            .await
            .with_context(|| format!("FRED CSV download failed for {}", series.id))?;
        parse_csv(&body)
    }
}

/// Parse a `fredgraph.csv` body: a header row then `date,value` rows.
pub fn parse_csv(body: &str) -> Result<Vec<RawObservation>> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        anyhow::bail!("FRED CSV endpoint returned HTML instead of CSV");
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(trimmed.as_bytes());

    let headers = reader.headers().context("FRED CSV has no header row")?;
    if headers.len() < 2 {
        anyhow::bail!("FRED CSV header has {} columns, expected 2", headers.len());
    }

    let fetched_at = Utc::now();
    let mut observations = Vec::new();
    for result in reader.records() {
        let record = result.context("FRED CSV parsing error")?;
        let (Some(date), Some(value)) = (record.get(0), record.get(1)) else {
            continue;
        };
        let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
            debug!(date, "Skipping FRED CSV row with unparseable date");
            continue;
        };
        observations.push(RawObservation::scraped(date, value, fetched_at));
    }
    Ok(observations)
}

#[async_trait]
impl Fetcher for FredCsvFetcher {
    fn name(&self) -> &'static str {
        "fred_csv"
    }

    fn source(&self) -> DataSource {
        DataSource::BulkCsv
    }

    async fn fetch(&self, series: &SeriesDescriptor, range: YearRange) -> Vec<RawObservation> {
        match self.try_fetch(series, range).await {
            Ok(obs) => {
                debug!(series = %series.id, count = obs.len(), "FRED CSV observations");
                within_range(obs, &range)
            }
            Err(e) => {
                warn!(series = %series.id, error = %e, "FRED CSV fetch failed");
                Vec::new()
            }
        }
    }
}
