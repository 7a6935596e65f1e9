//! BLS Public Data API v2 fetcher.
//!
//! API: `POST https://api.bls.gov/publicAPI/v2/timeseries/data/`
//! Body: `{"seriesid": [...], "startyear": "2020", "endyear": "2024"}`
//! The API caps each request at a window of years, so longer ranges are
//! fetched in chunks. A registration key is optional (higher limits).
//! Only series with a BLS id are handled; others return nothing.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::http::SourceClient;
use super::{within_range, Fetcher, RawObservation};
use crate::types::{DataSource, SeriesDescriptor, YearRange};

pub const DEFAULT_BASE_URL: &str = "https://api.bls.gov/publicAPI/v2";

/// Maximum years per request.
const MAX_YEARS_PER_REQUEST: i32 = 10;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct BlsRequest<'a> {
    seriesid: Vec<&'a str>,
    startyear: String,
    endyear: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    registrationkey: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct BlsResponse {
    status: String,
    #[serde(default)]
    message: Vec<String>,
    #[serde(rename = "Results", default)]
    results: Option<BlsResults>,
}

#[derive(Debug, Deserialize)]
struct BlsResults {
    #[serde(default)]
    series: Vec<BlsSeries>,
}

#[derive(Debug, Deserialize)]
struct BlsSeries {
    #[serde(default)]
    data: Vec<BlsDatum>,
}

#[derive(Debug, Deserialize)]
struct BlsDatum {
    year: String,
    period: String,
    value: String,
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

pub struct BlsApiFetcher {
    client: Arc<SourceClient>,
    base_url: String,
    api_key: Option<SecretString>,
}

impl BlsApiFetcher {
    pub fn new(client: Arc<SourceClient>, base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    async fn fetch_window(&self, bls_id: &str, window: YearRange) -> Result<Vec<RawObservation>> {
        let url = format!("{}/timeseries/data/", self.base_url);
        let request = BlsRequest {
            seriesid: vec![bls_id],
            startyear: window.start.to_string(),
            endyear: window.end.to_string(),
            registrationkey: self.api_key.as_ref().map(|k| k.expose_secret().as_str()),
        };
        let body = self
            .client
            .post_json(&url, &request)
            .await
            .with_context(|| format!("BLS API request failed for {bls_id} ({window})"))?;
        parse_response(&body)
    }
}

/// Split `range` into consecutive windows the API will accept.
pub fn request_windows(range: YearRange) -> Vec<YearRange> {
    let mut windows = Vec::new();
    let mut start = range.start;
    while start <= range.end {
        let end = (start + MAX_YEARS_PER_REQUEST - 1).min(range.end);
        windows.push(YearRange::new(start, end));
        start = end + 1;
    }
    windows
}

/// Parse a BLS v2 response body. Annual averages (`M13`) and non-monthly
/// periods are skipped.
pub fn parse_response(body: &str) -> Result<Vec<RawObservation>> {
    let data: BlsResponse = serde_json::from_str(body).context("Failed to parse BLS response")?;
    if data.status != "REQUEST_SUCCEEDED" {
        anyhow::bail!("BLS API status {}: {}", data.status, data.message.join("; "));
    }

    let Some(series) = data.results.and_then(|r| r.series.into_iter().next()) else {
        return Ok(Vec::new());
    };

    Ok(series
        .data
        .into_iter()
        .filter_map(|d| {
            let month: u32 = d.period.strip_prefix('M')?.parse().ok()?;
            if !(1..=12).contains(&month) {
                return None;
            }
            let year: i32 = d.year.parse().ok()?;
            let date = NaiveDate::from_ymd_opt(year, month, 1)?;
            Some(RawObservation::new(date, d.value))
        })
        .collect())
}

#[async_trait]
impl Fetcher for BlsApiFetcher {
    fn name(&self) -> &'static str {
        "bls_api"
    }

    fn source(&self) -> DataSource {
        DataSource::OfficialApi
    }

    async fn fetch(&self, series: &SeriesDescriptor, range: YearRange) -> Vec<RawObservation> {
        let Some(bls_id) = series.bls_id.as_deref() else {
            debug!(series = %series.id, "No BLS id, skipping BLS API");
            return Vec::new();
        };

        let mut all = Vec::new();
        for window in request_windows(range) {
            match self.fetch_window(bls_id, window).await {
                Ok(obs) => all.extend(obs),
                Err(e) => {
                    warn!(series = %series.id, bls_id, window = %window, error = %e, "BLS API fetch failed");
                    return Vec::new();
                }
            }
        }

        debug!(series = %series.id, count = all.len(), "BLS API observations");
        within_range(all, &range)
    }
}
