//! BLS data-viewer HTML table scraper.
//!
//! Page: `https://data.bls.gov/timeseries/{bls_id}?output_view=data&from_year=..&to_year=..`
//! The page renders one row per year with a column per month. Preliminary
//! values carry a `(P)` marker which is stripped. BLS answers automated
//! clients with an "Access Denied" page; that is treated as a failure.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::http::{RequestProfile, SourceClient};
use super::{is_missing, within_range, Fetcher, RawObservation};
use crate::types::{DataSource, SeriesDescriptor, YearRange};

pub const DEFAULT_BASE_URL: &str = "https://data.bls.gov";

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Footnote markers BLS appends to values.
const VALUE_MARKERS: &[&str] = &["(P)", "(p)", "(R)", "(r)"];

pub struct BlsTableFetcher {
    client: Arc<SourceClient>,
    base_url: String,
}

impl BlsTableFetcher {
    pub fn new(client: Arc<SourceClient>, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn page_url(&self, bls_id: &str, range: &YearRange) -> String {
        format!(
            "{}/timeseries/{}?output_view=data&from_year={}&to_year={}",
            self.base_url,
            urlencoding::encode(bls_id),
            range.start,
            range.end,
        )
    }

    async fn try_fetch(&self, bls_id: &str, range: YearRange) -> Result<Vec<RawObservation>> {
        self.client.polite_delay().await;
        let url = self.page_url(bls_id, &range);
        let body = self
            .client
            .get_text(&url, RequestProfile::Browser)
            .await
            .with_context(|| format!("BLS page download failed for {bls_id}"))?;
        parse_table(&body)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector {css:?}: {e}"))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

fn month_index(header: &str) -> Option<u32> {
    let h = header.trim().to_lowercase();
    let prefix = h.get(..3)?;
    MONTHS.iter().position(|m| *m == prefix).map(|i| i as u32 + 1)
}

fn parse_year_cell(text: &str) -> Option<i32> {
    let t = text.trim();
    (t.len() == 4 && t.chars().all(|c| c.is_ascii_digit()))
        .then(|| t.parse().ok())
        .flatten()
}

fn clean_value(text: &str) -> String {
    let mut v = text.to_string();
    for marker in VALUE_MARKERS {
        v = v.replace(marker, "");
    }
    v.trim().to_string()
}

/// Parse a BLS data-viewer page into monthly observations.
pub fn parse_table(html: &str) -> Result<Vec<RawObservation>> {
    if html.contains("Access Denied") {
        anyhow::bail!("BLS returned an Access Denied page");
    }

    let document = Html::parse_document(html);
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let cell_sel = selector("th, td")?;

    let scraped_at = Utc::now();
    let mut observations = Vec::new();

    for table in document.select(&table_sel) {
        // Column index -> month number, taken from the header row.
        let mut columns: HashMap<usize, u32> = HashMap::new();

        for row in table.select(&row_sel) {
            let cells: Vec<String> = row.select(&cell_sel).map(cell_text).collect();
            if cells.is_empty() {
                continue;
            }

            let header: HashMap<usize, u32> = cells
                .iter()
                .enumerate()
                .filter_map(|(i, c)| month_index(c).map(|m| (i, m)))
                .collect();
            if header.len() >= 6 {
                columns = header;
                continue;
            }

            let Some(year) = parse_year_cell(&cells[0]) else {
                continue;
            };
            for (idx, month) in &columns {
                let Some(raw) = cells.get(*idx) else {
                    continue;
                };
                let value = clean_value(raw);
                if is_missing(&value) {
                    continue;
                }
                if let Some(date) = NaiveDate::from_ymd_opt(year, *month, 1) {
                    observations.push(RawObservation::scraped(date, value, scraped_at));
                }
            }
        }
    }

    if observations.is_empty() {
        anyhow::bail!("no year/month table found on BLS page");
    }
    Ok(observations)
}

#[async_trait]
impl Fetcher for BlsTableFetcher {
    fn name(&self) -> &'static str {
        "bls_table"
    }

    fn source(&self) -> DataSource {
        DataSource::LiveScraped
    }

    async fn fetch(&self, series: &SeriesDescriptor, range: YearRange) -> Vec<RawObservation> {
        let Some(bls_id) = series.bls_id.as_deref() else {
            debug!(series = %series.id, "No BLS id, skipping BLS table scrape");
            return Vec::new();
        };

        match self.try_fetch(bls_id, range).await {
            Ok(obs) => {
                debug!(series = %series.id, count = obs.len(), "BLS table observations");
                within_range(obs, &range)
            }
            Err(e) => {
                warn!(series = %series.id, bls_id, error = %e, "BLS table scrape failed");
                Vec::new()
            }
        }
    }
}
