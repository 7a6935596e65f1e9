//! FRED JSON API fetcher.
//!
//! API: `https://api.stlouisfed.org/fred/series/observations`
//! Auth: API key via `api_key` query param. Without a key this fetcher
//! is skipped (returns nothing) and the chain moves on.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::http::{RequestProfile, SourceClient};
use super::{within_range, Fetcher, RawObservation};
use crate::types::{DataSource, SeriesDescriptor, YearRange};

pub const DEFAULT_BASE_URL: &str = "https://api.stlouisfed.org/fred";

// ---------------------------------------------------------------------------
// FRED API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FredResponse {
    #[serde(default)]
    observations: Vec<FredObservation>,
}

#[derive(Debug, Deserialize)]
struct FredObservation {
    date: String,
    value: String,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

pub struct FredApiFetcher {
    client: Arc<SourceClient>,
    base_url: String,
    api_key: Option<SecretString>,
}

impl FredApiFetcher {
    pub fn new(client: Arc<SourceClient>, base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn observations_url(&self) -> String {
        format!("{}/series/observations", self.base_url)
    }

    async fn try_fetch(&self, series: &SeriesDescriptor, range: YearRange, api_key: &str) -> Result<Vec<RawObservation>> {
        let start = range.start_date().to_string();
        let end = range.end_date().to_string();
        // The key goes through the query builder so it never appears in the URL string.
        let query = [
            ("series_id", series.id.as_str()),
            ("api_key", api_key),
            ("file_type", "json"),
            ("observation_start", start.as_str()),
            ("observation_end", end.as_str()),
        ];
        let body = self
            .client
            .get_text_with_query(&self.observations_url(), &query, RequestProfile::Api)
            .await
            .with_context(|| format!("FRED API request failed for {}", series.id))?;
        parse_observations(&body)
    }
}

/// Parse a FRED `series/observations` JSON body.
pub fn parse_observations(body: &str) -> Result<Vec<RawObservation>> {
    let data: FredResponse = serde_json::from_str(body).context("Failed to parse FRED response")?;
    Ok(data
        .observations
        .into_iter()
        .filter_map(|o| {
            let date = NaiveDate::parse_from_str(&o.date, "%Y-%m-%d").ok()?;
            Some(RawObservation::new(date, o.value))
        })
        .collect())
}

#[async_trait]
impl Fetcher for FredApiFetcher {
    fn name(&self) -> &'static str {
        "fred_api"
    }

    fn source(&self) -> DataSource {
        DataSource::OfficialApi
    }

    async fn fetch(&self, series: &SeriesDescriptor, range: YearRange) -> Vec<RawObservation> {
        let Some(key) = self.api_key.as_ref() else {
            debug!(series = %series.id, "FRED API not configured (no key), skipping");
            return Vec::new();
        };

        match self.try_fetch(series, range, key.expose_secret()).await {
            Ok(obs) => {
                debug!(series = %series.id, count = obs.len(), "FRED API observations");
                within_range(obs, &range)
            }
            Err(e) => {
                warn!(series = %series.id, error = %e, "FRED API fetch failed");
                Vec::new()
            }
        }
    }
}
