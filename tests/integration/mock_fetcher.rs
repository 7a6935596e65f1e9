//! Mock fetcher for integration testing.
//!
//! Provides a deterministic `Fetcher` implementation that serves a
//! generated monthly history, counts calls, and can be switched into a
//! failing mode, all in-memory with no network access.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use macrofeed::data::{Fetcher, RawObservation};
use macrofeed::types::{DataSource, SeriesDescriptor, YearRange};

/// Last month of generated history.
pub const HISTORY_END: (i32, u32) = (2025, 2);

/// A controllable fetcher. Clones share call counts and failure state.
#[derive(Clone)]
pub struct MockFetcher {
    name: &'static str,
    source: DataSource,
    calls: Arc<Mutex<Vec<(String, YearRange)>>>,
    failing: Arc<Mutex<bool>>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub fn new(name: &'static str, source: DataSource) -> Self {
        Self {
            name,
            source,
            calls: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(false)),
            delay: None,
        }
    }

    /// A fetcher that always comes back empty.
    pub fn failing(name: &'static str) -> Self {
        let f = Self::new(name, DataSource::OfficialApi);
        f.set_failing(true);
        f
    }

    /// Sleep before answering, to exercise timeouts and coalescing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<(String, YearRange)> {
        self.calls.lock().unwrap().clone()
    }

    /// Monthly values for every month of `range` up to `HISTORY_END`.
    pub fn history(range: YearRange) -> Vec<RawObservation> {
        let (end_year, end_month) = HISTORY_END;
        range
            .years()
            .flat_map(|y| (1..=12u32).map(move |m| (y, m)))
            .filter(|(y, m)| (*y, *m) <= (end_year, end_month))
            .filter_map(|(y, m)| {
                let date = NaiveDate::from_ymd_opt(y, m, 1)?;
                let value = 250.0 + (y - 2000) as f64 * 3.0 + m as f64 * 0.25;
                Some(RawObservation::new(date, format!("{value:.3}")))
            })
            .collect()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &'static str {
        self.name
    }

    fn source(&self) -> DataSource {
        self.source
    }

    async fn fetch(&self, series: &SeriesDescriptor, range: YearRange) -> Vec<RawObservation> {
        self.calls.lock().unwrap().push((series.id.clone(), range));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if *self.failing.lock().unwrap() {
            return Vec::new();
        }
        Self::history(range)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use macrofeed::catalog::SeriesCatalog;

    #[test]
    fn test_history_stops_at_end() {
        let obs = MockFetcher::history(YearRange::new(2024, 2026));
        assert_eq!(obs.len(), 14);
        let last = obs.last().unwrap();
        assert_eq!((last.date.year(), last.date.month()), HISTORY_END);
    }

    #[test]
    fn test_mock_counts_and_fails() {
        let series = SeriesCatalog::new().resolve("cpi").unwrap();
        let fetcher = MockFetcher::new("mock", DataSource::BulkCsv);
        let shared = fetcher.clone();

        let rows = tokio_test::block_on(fetcher.fetch(&series, YearRange::single(2024)));
        assert_eq!(rows.len(), 12);

        shared.set_failing(true);
        let rows = tokio_test::block_on(fetcher.fetch(&series, YearRange::single(2024)));
        assert!(rows.is_empty());
        assert_eq!(shared.call_count(), 2);
        assert_eq!(shared.calls()[0].0, "CPIAUCSL");
    }
}
