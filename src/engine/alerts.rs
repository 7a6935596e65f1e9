//! Change alerts and two-series comparison.
//!
//! A period-over-period move is measured in basis points of percent change
//! (a 0.25% move is 25 bps) and rated against configurable thresholds.
//! Moves below the INFO threshold raise nothing.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::normalizer;
use crate::types::{DataPoint, SeriesDescriptor};

// ---------------------------------------------------------------------------
// Configuration (defaults, overridden by the [alerts] config section)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub info_bps: u32,
    pub warning_bps: u32,
    pub critical_bps: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            info_bps: 5,
            warning_bps: 10,
            critical_bps: 25,
        }
    }
}

impl AlertThresholds {
    /// Rate a move of `change_bps`. The highest threshold reached wins.
    pub fn classify(&self, change_bps: u32) -> Option<AlertLevel> {
        if change_bps >= self.critical_bps {
            Some(AlertLevel::Critical)
        } else if change_bps >= self.warning_bps {
            Some(AlertLevel::Warning)
        } else if change_bps >= self.info_bps {
            Some(AlertLevel::Info)
        } else {
            None
        }
    }

    pub fn is_ordered(&self) -> bool {
        self.info_bps > 0 && self.info_bps <= self.warning_bps && self.warning_bps <= self.critical_bps
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeAlert {
    pub ticker: String,
    pub series_id: String,
    pub title: String,
    pub period: String,
    pub current_value: f64,
    pub previous_value: f64,
    pub change_pct: f64,
    pub change_bps: u32,
    pub level: AlertLevel,
}

/// Alerts plus per-level counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlertReport {
    pub checked: usize,
    pub alerts: Vec<ChangeAlert>,
    pub info: usize,
    pub warning: usize,
    pub critical: usize,
    /// Tickers that could not be loaded.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
}

impl AlertReport {
    /// Build from raw alerts, most severe (then largest move) first.
    pub fn new(checked: usize, mut alerts: Vec<ChangeAlert>, mut unavailable: Vec<String>) -> Self {
        alerts.sort_by(|a, b| {
            b.level
                .cmp(&a.level)
                .then(b.change_bps.cmp(&a.change_bps))
                .then(a.ticker.cmp(&b.ticker))
        });
        unavailable.sort();
        let count = |level| alerts.iter().filter(|a| a.level == level).count();
        Self {
            checked,
            info: count(AlertLevel::Info),
            warning: count(AlertLevel::Warning),
            critical: count(AlertLevel::Critical),
            alerts,
            unavailable,
        }
    }
}

/// Percent change to whole basis points, truncated.
pub fn to_bps(change_pct: f64) -> u32 {
    // Hundredths of a bp are rounded first so 0.05% is 5 bps, not 4.
    let hundredths = (change_pct.abs() * 10_000.0).round();
    (hundredths / 100.0).floor() as u32
}

/// Rate the newest move of `points` (newest first) against `thresholds`.
/// Returns `None` without a directly preceding period or below INFO.
pub fn check_change(
    ticker: &str,
    series: &SeriesDescriptor,
    points: &[DataPoint],
    thresholds: &AlertThresholds,
) -> Option<ChangeAlert> {
    let current = points.first()?;
    let change_pct = normalizer::percent_change(points, 0, series.frequency, 1)?;
    let previous = points.get(1)?;
    let change_bps = to_bps(change_pct);
    let level = thresholds.classify(change_bps)?;

    debug!(ticker, series_id = %series.id, change_bps, level = ?level, "Change alert");
    Some(ChangeAlert {
        ticker: ticker.to_string(),
        series_id: series.id.clone(),
        title: series.title.clone(),
        period: current.period.clone(),
        current_value: current.value,
        previous_value: previous.value,
        change_pct,
        change_bps,
        level,
    })
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorLatest {
    pub ticker: String,
    pub series_id: String,
    pub title: String,
    pub latest_value: Option<f64>,
    pub latest_period: Option<String>,
    pub latest_date: Option<NaiveDate>,
}

impl IndicatorLatest {
    pub fn new(ticker: &str, series: &SeriesDescriptor, points: &[DataPoint]) -> Self {
        let latest = points.first();
        Self {
            ticker: ticker.to_string(),
            series_id: series.id.clone(),
            title: series.title.clone(),
            latest_value: latest.map(|p| p.value),
            latest_period: latest.map(|p| p.period.clone()),
            latest_date: latest.map(|p| p.date),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComparisonMetrics {
    /// `a / b`; `None` when `b` is zero.
    pub ratio: Option<f64>,
    pub difference: f64,
    /// `(a - b) / b * 100`; `None` when `b` is zero.
    pub percent_difference: Option<f64>,
}

pub fn compare_values(a: f64, b: f64) -> ComparisonMetrics {
    let nonzero = b != 0.0;
    ComparisonMetrics {
        ratio: nonzero.then(|| a / b),
        difference: a - b,
        percent_difference: nonzero.then(|| (a - b) / b * 100.0),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub a: IndicatorLatest,
    pub b: IndicatorLatest,
    /// Present only when both sides have a latest value.
    pub metrics: Option<ComparisonMetrics>,
}

impl Comparison {
    pub fn new(a: IndicatorLatest, b: IndicatorLatest) -> Self {
        let metrics = match (a.latest_value, b.latest_value) {
            (Some(x), Some(y)) => Some(compare_values(x, y)),
            _ => None,
        };
        Self { a, b, metrics }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
