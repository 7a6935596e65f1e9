//! Terminal load errors.
//!
//! Only these cross the source-chain boundary. Per-fetcher failures are
//! logged and recorded as attempts, never raised.

use thiserror::Error;

use crate::types::YearRange;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    /// The requested name maps to no known series.
    #[error("unknown series '{input}'; valid tickers include: {}", suggestions.join(", "))]
    UnknownSeries {
        input: String,
        suggestions: Vec<String>,
    },

    /// Every fetcher came back empty and no stale snapshot could stand in.
    #[error("no data available for {series_id} ({range}); tried: {}", attempted.join("; "))]
    NoDataAvailable {
        series_id: String,
        range: YearRange,
        attempted: Vec<String>,
    },
}

impl LoadError {
    /// Valid alternatives to show the caller.
    pub fn suggestions(&self) -> &[String] {
        match self {
            LoadError::UnknownSeries { suggestions, .. } => suggestions,
            LoadError::NoDataAvailable { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_series_message_lists_suggestions() {
        let e = LoadError::UnknownSeries {
            input: "cpx".into(),
            suggestions: vec!["cpi".into(), "cpi_core".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("'cpx'"));
        assert!(msg.contains("cpi, cpi_core"));
        assert_eq!(e.suggestions().len(), 2);
    }

    #[test]
    fn test_no_data_message_lists_attempts() {
        let e = LoadError::NoDataAvailable {
            series_id: "UNRATE".into(),
            range: YearRange::new(2020, 2021),
            attempted: vec!["fred_api: not configured".into(), "fred_csv: empty".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("UNRATE (2020-2021)"));
        assert!(msg.contains("fred_csv: empty"));
        assert!(e.suggestions().is_empty());
    }
}
