//! Normalizer: raw observations to canonical `DataPoint` lists.
//!
//! Canonical order is NEWEST FIRST. Derived metrics look up the prior
//! period by date rather than by a fixed index offset, so gaps in a
//! series yield `None` instead of a change against the wrong month.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::data::{is_missing, RawObservation};
use crate::types::{periods_before, DataPoint, EnrichedPoint, Frequency};

/// Parse a source value string. Thousands separators are tolerated.
pub fn coerce_value(raw: &str) -> Option<f64> {
    if is_missing(raw) {
        return None;
    }
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Coerce, deduplicate and sort raw observations.
///
/// Duplicates (same period) keep the most recently scraped value; without
/// scrape timestamps the last one seen wins.
pub fn normalize(raw: Vec<RawObservation>, frequency: Frequency) -> Vec<DataPoint> {
    let mut best: HashMap<NaiveDate, (DataPoint, Option<chrono::DateTime<chrono::Utc>>)> =
        HashMap::with_capacity(raw.len());

    for obs in raw {
        let Some(value) = coerce_value(&obs.value) else {
            continue;
        };
        let Some(point) = DataPoint::new(obs.date, value, frequency) else {
            continue;
        };
        let keep_existing = matches!(
            best.get(&point.date),
            Some((_, seen_at)) if obs.scraped_at < *seen_at
        );
        if !keep_existing {
            best.insert(point.date, (point, obs.scraped_at));
        }
    }

    let mut points: Vec<DataPoint> = best.into_values().map(|(p, _)| p).collect();
    points.sort_by(|a, b| b.date.cmp(&a.date));
    points
}

fn pct_change(current: f64, prior: f64) -> Option<f64> {
    if prior == 0.0 {
        return None;
    }
    let pct = (current - prior) / prior * 100.0;
    Some((pct * 10_000.0).round() / 10_000.0)
}

/// Percent change of `points[index]` versus the observation `steps`
/// periods earlier. `points` must be newest first.
pub fn percent_change(points: &[DataPoint], index: usize, frequency: Frequency, steps: u32) -> Option<f64> {
    let current = points.get(index)?;
    let target = periods_before(current.date, frequency, steps)?;
    let prior = points[index + 1..].iter().find(|p| p.date <= target)?;
    if prior.date != target {
        return None;
    }
    pct_change(current.value, prior.value)
}

/// Month-over-month percent change at `index` (newest-first slice).
pub fn month_over_month(points: &[DataPoint], index: usize) -> Option<f64> {
    percent_change(points, index, Frequency::Monthly, 1)
}

/// Year-over-year percent change at `index` (newest-first slice).
pub fn year_over_year(points: &[DataPoint], index: usize, frequency: Frequency) -> Option<f64> {
    let steps = frequency.periods_per_year()? as u32;
    percent_change(points, index, frequency, steps)
}

/// Attach derived metrics. Month-over-month is only defined for monthly series.
pub fn enrich(points: &[DataPoint], frequency: Frequency) -> Vec<EnrichedPoint> {
    (0..points.len())
        .map(|i| EnrichedPoint {
            point: points[i].clone(),
            mom_pct: match frequency {
                Frequency::Monthly => month_over_month(points, i),
                _ => None,
            },
            yoy_pct: year_over_year(points, i, frequency),
        })
        .collect()
}
