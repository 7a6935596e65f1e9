//! Data source fetchers.
//!
//! Defines the `Fetcher` trait and one implementation per upstream source.
//! Fetchers never fail past their own boundary: any network, status or
//! parse problem is logged and reported as an empty result so the source
//! chain can move on to the next fetcher.

pub mod http;
pub mod fred_api;
pub mod bls_api;
pub mod fred_csv;
pub mod bls_table;
pub mod synthetic;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::types::{DataSource, SeriesDescriptor, YearRange};

/// A raw observation as delivered by a source, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub date: NaiveDate,
    /// Value text exactly as the source printed it.
    pub value: String,
    /// When the value was scraped, if the source is a live scrape.
    pub scraped_at: Option<DateTime<Utc>>,
}

impl RawObservation {
    pub fn new(date: NaiveDate, value: impl Into<String>) -> Self {
        Self {
            date,
            value: value.into(),
            scraped_at: None,
        }
    }

    pub fn scraped(date: NaiveDate, value: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            date,
            value: value.into(),
            scraped_at: Some(at),
        }
    }
}

/// Abstraction over one upstream data source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short stable name used in logs, config and error reports.
    fn name(&self) -> &'static str;

    /// Source tag stamped on snapshots produced by this fetcher.
    fn source(&self) -> DataSource;

    /// Fetch observations for `series` within `range`. Empty on any failure.
    async fn fetch(&self, series: &SeriesDescriptor, range: YearRange) -> Vec<RawObservation>;
}

/// Value strings that mean "no observation".
pub const MISSING_SENTINELS: &[&str] = &["", ".", "-", "na", "n/a", "m", "(na)"];

pub fn is_missing(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    MISSING_SENTINELS.contains(&v.as_str())
}

/// Keep only observations whose year falls inside `range`.
pub fn within_range(observations: Vec<RawObservation>, range: &YearRange) -> Vec<RawObservation> {
    use chrono::Datelike;
    observations
        .into_iter()
        .filter(|o| range.contains(o.date.year()))
        .collect()
}
