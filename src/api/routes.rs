//! HTTP route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::error;

use crate::engine::{AlertReport, ChangeAlert, Comparison, DataService, SeriesSummary, ServiceStats};
use crate::error::LoadError;
use crate::types::{DataPoint, SeriesDescriptor, StandardizedResponse};

/// Tickers served by `/dashboard` when none are requested.
const DEFAULT_DASHBOARD_TICKERS: &[&str] = &["cpi", "cpi_core", "ppi", "unemployment", "gdp"];
/// Upper bound on tickers per dashboard request.
const MAX_DASHBOARD_TICKERS: usize = 20;
const DEFAULT_LATEST_N: usize = 12;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiState {
    pub service: Arc<DataService>,
    pub name: String,
    pub version: String,
    /// Cap for `limit` / `n` query parameters.
    pub max_results: usize,
    pub dashboard_tickers: Vec<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl ApiState {
    pub fn new(service: Arc<DataService>, name: impl Into<String>, version: impl Into<String>, max_results: usize) -> Self {
        Self {
            service,
            name: name.into(),
            version: version.into(),
            max_results: max_results.max(1),
            dashboard_tickers: DEFAULT_DASHBOARD_TICKERS.iter().map(|t| t.to_string()).collect(),
            started_at: chrono::Utc::now(),
        }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct DataQuery {
    pub date: Option<String>,
    #[serde(default)]
    pub refresh: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LatestQuery {
    pub n: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    /// Comma-separated tickers.
    pub tickers: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    /// Comma-separated tickers.
    pub tickers: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub endpoints: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct IndicatorsResponse {
    pub count: usize,
    pub indicators: Vec<SeriesDescriptor>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl From<&LoadError> for ErrorBody {
    fn from(e: &LoadError) -> Self {
        Self {
            error: e.to_string(),
            suggestions: e.suggestions().to_vec(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub succeeded: usize,
    pub failed: usize,
    pub results: BTreeMap<String, StandardizedResponse>,
    pub alerts: Vec<ChangeAlert>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub service: ServiceStats,
    pub uptime_secs: i64,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub memory_cleared: usize,
    pub disk_cleared: usize,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn not_found(e: &LoadError) -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorBody::from(e)))
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /
pub async fn root(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: state.name.clone(),
        version: state.version.clone(),
        endpoints: vec![
            "GET /health",
            "GET /indicators",
            "GET /data/:ticker?date=&refresh=&limit=",
            "GET /data/:ticker/raw?date=&refresh=",
            "GET /data/:ticker/latest?n=",
            "GET /data/:ticker/summary",
            "GET /dashboard?tickers=&date=",
            "GET /alerts?tickers=",
            "GET /compare/:a/:b",
            "GET /stats",
            "POST /cache/clear",
        ],
    })
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /indicators
pub async fn indicators(State(state): State<AppState>) -> Json<IndicatorsResponse> {
    let indicators = state.service.catalog().list().to_vec();
    Json(IndicatorsResponse {
        count: indicators.len(),
        indicators,
    })
}

/// GET /data/:ticker
pub async fn get_data(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(q): Query<DataQuery>,
) -> (StatusCode, Json<StandardizedResponse>) {
    let mut resp = state
        .service
        .load_envelope(&ticker, q.date.as_deref(), q.refresh)
        .await;

    if !resp.success {
        return (StatusCode::NOT_FOUND, Json(resp));
    }

    let limit = q.limit.unwrap_or(state.max_results).min(state.max_results);
    resp.data.truncate(limit);
    resp.metadata.total_points = resp.data.len();
    (StatusCode::OK, Json(resp))
}

/// GET /data/:ticker/raw
pub async fn get_raw(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(q): Query<DataQuery>,
) -> Result<Json<Vec<DataPoint>>, ApiError> {
    let mut points = state
        .service
        .load_raw(&ticker, q.date.as_deref(), q.refresh)
        .await
        .map_err(|e| not_found(&e))?;
    points.truncate(q.limit.unwrap_or(state.max_results).min(state.max_results));
    Ok(Json(points))
}

/// GET /data/:ticker/latest
pub async fn get_latest(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(q): Query<LatestQuery>,
) -> Result<Json<Vec<DataPoint>>, ApiError> {
    let n = q.n.unwrap_or(DEFAULT_LATEST_N).min(state.max_results);
    let points = state
        .service
        .latest(&ticker, n)
        .await
        .map_err(|e| not_found(&e))?;
    Ok(Json(points))
}

/// GET /data/:ticker/summary
pub async fn get_summary(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<SeriesSummary>, ApiError> {
    state
        .service
        .summary(&ticker)
        .await
        .map(Json)
        .map_err(|e| not_found(&e))
}

/// Split a comma list, or fall back to the configured dashboard set.
/// Lower-cased, de-duplicated and capped.
fn requested_tickers(list: Option<&str>, defaults: &[String]) -> Vec<String> {
    let mut tickers: Vec<String> = match list {
        Some(list) => list
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect(),
        None => defaults.to_vec(),
    };
    tickers.sort();
    tickers.dedup();
    tickers.truncate(MAX_DASHBOARD_TICKERS);
    tickers
}

/// GET /dashboard
pub async fn dashboard(State(state): State<AppState>, Query(q): Query<DashboardQuery>) -> Json<DashboardResponse> {
    let tickers = requested_tickers(q.tickers.as_deref(), &state.dashboard_tickers);
    let loaded = state.service.load_many(&tickers, q.date.as_deref()).await;
    let mut alerts = state.service.alerts_for(&loaded);
    alerts.sort_by(|a, b| b.level.cmp(&a.level).then(a.ticker.cmp(&b.ticker)));

    let results: BTreeMap<String, StandardizedResponse> = loaded.into_iter().collect();
    let succeeded = results.values().filter(|r| r.success).count();

    Json(DashboardResponse {
        succeeded,
        failed: results.len() - succeeded,
        results,
        alerts,
    })
}

/// GET /alerts
pub async fn alerts(State(state): State<AppState>, Query(q): Query<AlertsQuery>) -> Json<AlertReport> {
    let tickers = requested_tickers(q.tickers.as_deref(), &state.dashboard_tickers);
    Json(state.service.alerts(&tickers).await)
}

/// GET /compare/:a/:b
pub async fn compare(
    State(state): State<AppState>,
    Path((a, b)): Path<(String, String)>,
) -> Result<Json<Comparison>, ApiError> {
    state
        .service
        .compare(&a, &b)
        .await
        .map(Json)
        .map_err(|e| not_found(&e))
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        service: state.service.stats().await,
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}

/// POST /cache/clear
pub async fn clear_cache(State(state): State<AppState>) -> Result<Json<ClearResponse>, (StatusCode, Json<ErrorBody>)> {
    match state.service.clear_cache().await {
        Ok((memory_cleared, disk_cleared)) => Ok(Json(ClearResponse {
            memory_cleared,
            disk_cleared,
        })),
        Err(e) => {
            error!(error = %e, "Cache clear failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: format!("{e:#}"),
                    suggestions: Vec::new(),
                }),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::YearRange;

    #[test]
    fn test_requested_tickers_normalizes() {
        let defaults = vec!["cpi".to_string()];
        assert_eq!(requested_tickers(None, &defaults), vec!["cpi"]);
        assert_eq!(
            requested_tickers(Some(" PPI ,cpi,,ppi"), &defaults),
            vec!["cpi", "ppi"]
        );
        let many: Vec<String> = (0..50).map(|i| format!("t{i:02}")).collect();
        assert_eq!(requested_tickers(Some(many.join(",").as_str()), &defaults).len(), MAX_DASHBOARD_TICKERS);
    }

    #[test]
    fn test_error_body_from_unknown_series() {
        let e = LoadError::UnknownSeries {
            input: "zzz".into(),
            suggestions: vec!["cpi".into()],
        };
        let body = ErrorBody::from(&e);
        assert!(body.error.contains("zzz"));
        assert_eq!(body.suggestions, vec!["cpi"]);
    }

    #[test]
    fn test_error_body_omits_empty_suggestions() {
        let e = LoadError::NoDataAvailable {
            series_id: "GDP".into(),
            range: YearRange::single(2024),
            attempted: vec![],
        };
        let json = serde_json::to_value(ErrorBody::from(&e)).unwrap();
        assert!(json.get("suggestions").is_none());
    }
}
