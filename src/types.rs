//! Shared types for the macrofeed loader.
//!
//! These types form the data model used across all modules: reference
//! data (`SeriesDescriptor`), observations (`DataPoint`), cache snapshots
//! (`CacheEntry`), the tagged result of a load (`LoadOutcome`) and the
//! presentation envelope (`StandardizedResponse`).

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::LoadError;

// ---------------------------------------------------------------------------
// Series reference data
// ---------------------------------------------------------------------------

/// Sampling frequency of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

impl Frequency {
    /// Months between consecutive observations, `None` for sub-monthly series.
    pub fn step_months(&self) -> Option<u32> {
        match self {
            Frequency::Daily | Frequency::Weekly => None,
            Frequency::Monthly => Some(1),
            Frequency::Quarterly => Some(3),
            Frequency::Annual => Some(12),
        }
    }

    /// Observations per year, `None` for sub-monthly series.
    pub fn periods_per_year(&self) -> Option<usize> {
        self.step_months().map(|m| (12 / m) as usize)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
            Frequency::Quarterly => write!(f, "quarterly"),
            Frequency::Annual => write!(f, "annual"),
        }
    }
}

/// Statistical agency that publishes a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agency {
    /// Bureau of Labor Statistics
    Bls,
    /// Bureau of Economic Analysis
    Bea,
    /// Board of Governors of the Federal Reserve System
    FederalReserve,
    /// Unknown publisher (synthesized descriptors)
    Unknown,
}

impl fmt::Display for Agency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Agency::Bls => write!(f, "Bureau of Labor Statistics"),
            Agency::Bea => write!(f, "Bureau of Economic Analysis"),
            Agency::FederalReserve => write!(f, "Federal Reserve"),
            Agency::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonalAdjustment {
    SeasonallyAdjusted,
    NotSeasonallyAdjusted,
    NotApplicable,
}

/// Identifies one time series. Immutable reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesDescriptor {
    /// Canonical source id, e.g. `CPILFESL`.
    pub id: String,
    /// Lower-case friendly names that resolve to this series.
    pub aliases: BTreeSet<String>,
    pub title: String,
    pub units: String,
    pub frequency: Frequency,
    pub agency: Agency,
    pub seasonal_adjustment: SeasonalAdjustment,
    /// BLS series id for the BLS fetchers, when the series is published there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bls_id: Option<String>,
    /// True when built from a canonical-looking input rather than the catalog.
    #[serde(default)]
    pub synthesized: bool,
}

// ---------------------------------------------------------------------------
// Observations
// ---------------------------------------------------------------------------

/// One observation of a series.
///
/// Invariants: `value` is finite, `date.year() == year`, and when `month`
/// is set `date.month() == month`. Monthly and quarterly dates sit on the
/// first of the month, annual dates on January 1st.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub date: NaiveDate,
    pub value: f64,
    /// `"2025-06"` for monthly/quarterly, `"2025"` for annual, full date otherwise.
    pub period: String,
    pub year: i32,
    pub month: Option<u32>,
}

impl DataPoint {
    /// Build a point for `frequency`, snapping the date to the period start.
    /// Returns `None` for non-finite values.
    pub fn new(date: NaiveDate, value: f64, frequency: Frequency) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let year = date.year();
        let point = match frequency {
            Frequency::Monthly | Frequency::Quarterly => {
                let month = date.month();
                DataPoint {
                    date: NaiveDate::from_ymd_opt(year, month, 1)?,
                    value,
                    period: format!("{year}-{month:02}"),
                    year,
                    month: Some(month),
                }
            }
            Frequency::Annual => DataPoint {
                date: NaiveDate::from_ymd_opt(year, 1, 1)?,
                value,
                period: year.to_string(),
                year,
                month: None,
            },
            Frequency::Daily | Frequency::Weekly => DataPoint {
                date,
                value,
                period: date.format("%Y-%m-%d").to_string(),
                year,
                month: Some(date.month()),
            },
        };
        Some(point)
    }

    /// Convenience constructor for a monthly observation.
    pub fn monthly(year: i32, month: u32, value: f64) -> Option<Self> {
        Self::new(NaiveDate::from_ymd_opt(year, month, 1)?, value, Frequency::Monthly)
    }
}

/// A point plus the derived changes computed by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedPoint {
    #[serde(flatten)]
    pub point: DataPoint,
    /// Percent change versus the previous period (monthly series only).
    pub mom_pct: Option<f64>,
    /// Percent change versus the same period one year earlier.
    pub yoy_pct: Option<f64>,
}

// ---------------------------------------------------------------------------
// Year range
// ---------------------------------------------------------------------------

/// Inclusive range of calendar years. Always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    /// Build a range, swapping reversed bounds.
    pub fn new(start: i32, end: i32) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn single(year: i32) -> Self {
        Self { start: year, end: year }
    }

    pub fn contains(&self, year: i32) -> bool {
        self.start <= year && year <= self.end
    }

    pub fn covers(&self, other: &YearRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn start_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.start, 1, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn end_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.end, 12, 31).unwrap_or(NaiveDate::MAX)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }
}

impl fmt::Display for YearRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

// ---------------------------------------------------------------------------
// Sources, quality, tiers
// ---------------------------------------------------------------------------

/// Where a snapshot's points originally came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Official statistical-agency API (FRED, BLS).
    OfficialApi,
    /// Bulk CSV export.
    BulkCsv,
    /// HTML page scrape.
    LiveScraped,
    /// Read back from a cache written by an older build without a source tag.
    Cached,
    /// Generated sample data. Never real.
    Synthetic,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::OfficialApi => "official_api",
            DataSource::BulkCsv => "bulk_csv",
            DataSource::LiveScraped => "live_scraped",
            DataSource::Cached => "cached",
            DataSource::Synthetic => "synthetic",
        }
    }

    /// Quality tier a fresh result from this source is served at.
    pub fn quality(&self) -> Quality {
        match self {
            DataSource::OfficialApi => Quality::High,
            DataSource::BulkCsv | DataSource::LiveScraped | DataSource::Cached => Quality::Medium,
            DataSource::Synthetic => Quality::Synthetic,
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "official_api" => Ok(DataSource::OfficialApi),
            "bulk_csv" => Ok(DataSource::BulkCsv),
            "live_scraped" => Ok(DataSource::LiveScraped),
            "cached" => Ok(DataSource::Cached),
            "synthetic" => Ok(DataSource::Synthetic),
            other => anyhow::bail!("unknown data source tag: {other}"),
        }
    }
}

/// Quality marker carried by responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    High,
    Medium,
    Low,
    /// Stale cache served because every live source failed.
    Degraded,
    Synthetic,
}

/// Which tier of the chain answered a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Memory,
    Disk,
    Live,
}

// ---------------------------------------------------------------------------
// Cache entry
// ---------------------------------------------------------------------------

/// Default time-to-live for cached snapshots.
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// One cached snapshot of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub series_id: String,
    /// Newest first.
    #[serde(rename = "data_points")]
    pub points: Vec<DataPoint>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default = "legacy_source")]
    pub source: DataSource,
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Year range the snapshot was fetched for.
    pub coverage: YearRange,
}

fn legacy_source() -> DataSource {
    DataSource::Cached
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECS
}

impl CacheEntry {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.fetched_at
    }

    /// Fresh until `now - fetched_at` exceeds the TTL.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.age(now).num_milliseconds() <= (self.ttl_seconds as i64).saturating_mul(1000)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.fetched_at + chrono::Duration::seconds(self.ttl_seconds as i64)
    }

    pub fn covers(&self, range: &YearRange) -> bool {
        self.coverage.covers(range)
    }

    /// Copy of this entry with points outside `range` removed.
    pub fn within(&self, range: &YearRange) -> CacheEntry {
        CacheEntry {
            points: self
                .points
                .iter()
                .filter(|p| range.contains(p.year))
                .cloned()
                .collect(),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Load outcome
// ---------------------------------------------------------------------------

/// Tagged result of one pass through the source chain.
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    /// Fresh data from a cache tier or a live fetcher.
    Success { entry: CacheEntry, tier: Tier },
    /// All live fetchers failed; a stale snapshot was served instead.
    Degraded { entry: CacheEntry, staleness: chrono::Duration },
    Failure(LoadError),
}

impl LoadOutcome {
    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            LoadOutcome::Success { entry, .. } | LoadOutcome::Degraded { entry, .. } => Some(entry),
            LoadOutcome::Failure(_) => None,
        }
    }

    pub fn quality(&self) -> Option<Quality> {
        match self {
            LoadOutcome::Success { entry, .. } => Some(entry.source.quality()),
            LoadOutcome::Degraded { .. } => Some(Quality::Degraded),
            LoadOutcome::Failure(_) => None,
        }
    }

    pub fn into_result(self) -> Result<CacheEntry, LoadError> {
        match self {
            LoadOutcome::Success { entry, .. } | LoadOutcome::Degraded { entry, .. } => Ok(entry),
            LoadOutcome::Failure(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Standardized response envelope
// ---------------------------------------------------------------------------

/// Response metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub timestamp: DateTime<Utc>,
    pub source: Option<DataSource>,
    pub quality: Option<Quality>,
    pub tier: Option<Tier>,
    pub latency_ms: u64,
    pub total_points: usize,
    pub api_version: String,
    pub cache_expires: Option<DateTime<Utc>>,
    /// Age in seconds of a degraded (stale) snapshot.
    pub stale_seconds: Option<i64>,
}

/// Presentation envelope. `success == false` implies a non-empty `error`
/// and an empty `data` list; the constructors enforce this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedResponse {
    pub success: bool,
    pub data: Vec<EnrichedPoint>,
    pub series: Option<SeriesDescriptor>,
    pub metadata: ResponseMetadata,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl StandardizedResponse {
    pub fn success(
        data: Vec<EnrichedPoint>,
        series: SeriesDescriptor,
        mut metadata: ResponseMetadata,
    ) -> Self {
        metadata.total_points = data.len();
        Self {
            success: true,
            data,
            series: Some(series),
            metadata,
            error: None,
            suggestions: Vec::new(),
        }
    }

    pub fn failure(
        error: &LoadError,
        series: Option<SeriesDescriptor>,
        mut metadata: ResponseMetadata,
    ) -> Self {
        metadata.total_points = 0;
        Self {
            success: false,
            data: Vec::new(),
            series,
            metadata,
            error: Some(error.to_string()),
            suggestions: error.suggestions().to_vec(),
        }
    }
}

/// Expected date `steps` periods before `date` for a series of `frequency`.
pub(crate) fn periods_before(date: NaiveDate, frequency: Frequency, steps: u32) -> Option<NaiveDate> {
    let step = frequency.step_months()?;
    date.checked_sub_months(Months::new(step * steps))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
