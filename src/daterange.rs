//! Date-range mini-language.
//!
//! Accepted forms:
//! - `"2023"`: a single year
//! - `"2020-2023"` or `"2020:2023"`: an inclusive year range
//! - `"last 3 years"`: any phrase containing "last" and "year" plus an integer
//! - absent or empty: the default window (`current_year - 2 ..= current_year`)
//!
//! Anything else is malformed and falls back to the default window with a
//! warning. Parsing never fails.

use tracing::warn;

use crate::types::YearRange;

/// Years before the current one included in the default window.
pub const DEFAULT_LOOKBACK_YEARS: i32 = 2;

/// Earliest year accepted from user input.
const MIN_YEAR: i32 = 1800;
/// Latest year accepted from user input.
const MAX_YEAR: i32 = 2200;

pub fn default_range(current_year: i32) -> YearRange {
    YearRange::new(current_year - DEFAULT_LOOKBACK_YEARS, current_year)
}

/// Parse a date-range expression relative to `current_year`.
pub fn parse_year_range(input: Option<&str>, current_year: i32) -> YearRange {
    let raw = match input.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return default_range(current_year),
    };

    match try_parse(raw, current_year) {
        Some(range) => range,
        None => {
            let fallback = default_range(current_year);
            warn!(input = raw, fallback = %fallback, "Malformed date range, using default");
            fallback
        }
    }
}

fn try_parse(raw: &str, current_year: i32) -> Option<YearRange> {
    let lower = raw.to_lowercase();

    if lower.contains("last") && lower.contains("year") {
        let n = first_integer(&lower)?;
        return Some(YearRange::new(current_year - n, current_year));
    }

    if let Some((a, b)) = lower.split_once(['-', ':']) {
        return Some(YearRange::new(parse_year(a)?, parse_year(b)?));
    }

    parse_year(&lower).map(YearRange::single)
}

/// A strictly four-digit year within the accepted window.
fn parse_year(s: &str) -> Option<i32> {
    let s = s.trim();
    if s.len() != 4 || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let year: i32 = s.parse().ok()?;
    (MIN_YEAR..=MAX_YEAR).contains(&year).then_some(year)
}

fn first_integer(s: &str) -> Option<i32> {
    let digits: String = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let n: i32 = digits.parse().ok()?;
    (0..=(MAX_YEAR - MIN_YEAR)).contains(&n).then_some(n)
}
