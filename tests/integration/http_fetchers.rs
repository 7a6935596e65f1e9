//! Real fetchers against a local stand-in for the upstream services.
//!
//! A small axum app on an ephemeral port mimics the FRED JSON API, the
//! FRED CSV export, the BLS v2 API and the BLS data-viewer page closely
//! enough to exercise URLs, headers, retries and parsing end to end.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Datelike, TimeZone, Utc};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use macrofeed::catalog::SeriesCatalog;
use macrofeed::config::AppConfig;
use macrofeed::data::bls_api::BlsApiFetcher;
use macrofeed::data::bls_table::BlsTableFetcher;
use macrofeed::data::fred_api::FredApiFetcher;
use macrofeed::data::fred_csv::FredCsvFetcher;
use macrofeed::data::http::{HttpSettings, RequestProfile, SourceClient};
use macrofeed::data::Fetcher;
use macrofeed::engine::service::build_fetchers;
use macrofeed::engine::{ChainSettings, DataService, ManualClock, MemoryCache, SourceChain};
use macrofeed::storage::SqliteStore;
use macrofeed::types::{DataSource, Quality, YearRange};

const FRED_KEY: &str = "test-key";

// ---------------------------------------------------------------------------
// Upstream stand-in
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Upstream {
    flaky_hits: AtomicUsize,
    bls_bodies: std::sync::Mutex<Vec<Value>>,
    last_csv_user_agent: std::sync::Mutex<Option<String>>,
}

type Shared = Arc<Upstream>;

async fn fred_observations(Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
    if q.get("api_key").map(String::as_str) != Some(FRED_KEY) {
        return (StatusCode::BAD_REQUEST, Json(json!({"error_message": "Bad api_key"})));
    }
    if q.get("file_type").map(String::as_str) != Some("json") {
        return (StatusCode::BAD_REQUEST, Json(json!({"error_message": "file_type"})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "observation_start": q.get("observation_start"),
            "observations": [
                {"realtime_start": "2025-01-01", "date": "2023-12-01", "value": "306.7"},
                {"realtime_start": "2025-01-01", "date": "2024-01-01", "value": "308.4"},
                {"realtime_start": "2025-01-01", "date": "2024-02-01", "value": "."},
                {"realtime_start": "2025-01-01", "date": "2024-03-01", "value": "310.3"}
            ]
        })),
    )
}

async fn fred_csv(
    State(up): State<Shared>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    *up.last_csv_user_agent.lock().unwrap() = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    match q.get("id").map(String::as_str) {
        Some("UNRATE") => (
            StatusCode::OK,
            "observation_date,UNRATE\n2024-01-01,3.7\n2024-02-01,3.9\n2024-03-01,.\n2024-04-01,3.9\n".to_string(),
        ),
        Some("HTMLPAGE") => (StatusCode::OK, "<html><body>Sign in</body></html>".to_string()),
        _ => (StatusCode::NOT_FOUND, "Series not found".to_string()),
    }
}

async fn bls_data(State(up): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    up.bls_bodies.lock().unwrap().push(body.clone());
    let start: i32 = body["startyear"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0);
    let end: i32 = body["endyear"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0);

    let mut data = Vec::new();
    for year in (start..=end).rev() {
        data.push(json!({"year": year.to_string(), "period": "M13", "periodName": "Annual", "value": "4.0"}));
        for month in (1..=2).rev() {
            data.push(json!({
                "year": year.to_string(),
                "period": format!("M{month:02}"),
                "periodName": "Month",
                "value": format!("{}.{}", 3 + year % 2, month),
            }));
        }
    }
    Json(json!({
        "status": "REQUEST_SUCCEEDED",
        "message": [],
        "Results": {"series": [{"seriesID": body["seriesid"][0], "data": data}]}
    }))
}

async fn bls_page(Path(id): Path<String>) -> impl IntoResponse {
    if id == "CUUR0000SA0" {
        return (StatusCode::OK, "<html><h1>Access Denied</h1></html>".to_string());
    }
    let page = r#"
        <html><body><table class="regular-data">
          <thead><tr><th>Year</th><th>Jan</th><th>Feb</th><th>Mar</th><th>Apr</th><th>May</th>
            <th>Jun</th><th>Jul</th><th>Aug</th><th>Sep</th><th>Oct</th><th>Nov</th><th>Dec</th></tr></thead>
          <tbody>
            <tr><th>2024</th><td>308.4</td><td>310.3</td><td>312.3</td><td>313.5</td><td>314.0</td>
              <td>314.1</td><td>314.5</td><td>314.8</td><td>315.3</td><td>315.6</td><td>316.4</td><td>317.6(P)</td></tr>
          </tbody></table></body></html>"#;
    (StatusCode::OK, page.to_string())
}

async fn flaky(State(up): State<Shared>) -> impl IntoResponse {
    if up.flaky_hits.fetch_add(1, Ordering::SeqCst) == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "busy")
    } else {
        (StatusCode::OK, "ok")
    }
}

async fn down() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "down")
}

async fn forbidden() -> impl IntoResponse {
    (StatusCode::FORBIDDEN, "nope")
}

async fn spawn_upstream() -> (String, Shared) {
    let up: Shared = Arc::new(Upstream::default());
    let app = Router::new()
        .route("/fred/series/observations", get(fred_observations))
        .route("/graph/fredgraph.csv", get(fred_csv))
        .route("/bls/timeseries/data/", post(bls_data))
        .route("/timeseries/:id", get(bls_page))
        .route("/flaky", get(flaky))
        .route("/forbidden", get(forbidden))
        .route("/down/series/observations", get(down))
        .with_state(up.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), up)
}

fn fast_client() -> Arc<SourceClient> {
    Arc::new(
        SourceClient::new(HttpSettings {
            timeout: Duration::from_secs(5),
            max_retries: 2,
            backoff_base_ms: 10,
            min_delay_ms: 0,
            max_delay_ms: 0,
        })
        .unwrap(),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_client_retries_server_errors() {
    let (base, up) = spawn_upstream().await;
    let body = fast_client()
        .get_text(&format!("{base}/flaky"), RequestProfile::Api)
        .await
        .unwrap();
    assert_eq!(body, "ok");
    assert_eq!(up.flaky_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_does_not_retry_client_errors() {
    let (base, _) = spawn_upstream().await;
    let err = fast_client()
        .get_text(&format!("{base}/forbidden"), RequestProfile::Api)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("403"));
}

#[tokio::test]
async fn test_exhausted_retries_keep_key_out_of_error() {
    let (base, _) = spawn_upstream().await;
    let url = format!("{base}/down/series/observations");
    let err = fast_client()
        .get_text_with_query(&url, &[("series_id", "UNRATE"), ("api_key", "SUPERSECRETKEY")], RequestProfile::Api)
        .await
        .unwrap_err();
    let text = format!("{err:#}");
    assert!(text.contains("503"));
    assert!(text.contains(&url));
    assert!(!text.contains("SUPERSECRETKEY"));
    assert!(!text.contains("api_key"));
}

#[tokio::test]
async fn test_fred_api_fetcher() {
    let (base, _) = spawn_upstream().await;
    let series = SeriesCatalog::new().resolve("cpi").unwrap();

    let keyed = FredApiFetcher::new(fast_client(), format!("{base}/fred"), Some(SecretString::new(FRED_KEY.into())));
    let obs = keyed.fetch(&series, YearRange::single(2024)).await;
    // 2023 row is filtered out; the "." row is passed through for the normalizer.
    assert_eq!(obs.len(), 3);
    assert!(obs.iter().all(|o| o.date.year() == 2024));

    let wrong_key = FredApiFetcher::new(fast_client(), format!("{base}/fred"), Some(SecretString::new("bad".into())));
    assert!(wrong_key.fetch(&series, YearRange::single(2024)).await.is_empty());

    let keyless = FredApiFetcher::new(fast_client(), format!("{base}/fred"), None);
    assert!(keyless.fetch(&series, YearRange::single(2024)).await.is_empty());
}

#[tokio::test]
async fn test_fred_csv_fetcher_uses_browser_profile() {
    let (base, up) = spawn_upstream().await;
    let catalog = SeriesCatalog::new();
    let fetcher = FredCsvFetcher::new(fast_client(), &base);

    let obs = fetcher.fetch(&catalog.resolve("unemployment").unwrap(), YearRange::single(2024)).await;
    assert_eq!(obs.len(), 4);
    assert!(obs.iter().all(|o| o.scraped_at.is_some()));
    let agent = up.last_csv_user_agent.lock().unwrap().clone().unwrap();
    assert!(agent.starts_with("Mozilla/5.0"));

    // Unknown series is a 404, which is not retried and yields nothing.
    assert!(fetcher.fetch(&catalog.resolve("gdp").unwrap(), YearRange::single(2024)).await.is_empty());
}

#[tokio::test]
async fn test_bls_api_fetcher_chunks_and_skips_annual() {
    let (base, up) = spawn_upstream().await;
    let series = SeriesCatalog::new().resolve("unemployment").unwrap();
    let fetcher = BlsApiFetcher::new(fast_client(), format!("{base}/bls"), None);

    let obs = fetcher.fetch(&series, YearRange::new(2005, 2024)).await;
    assert_eq!(obs.len(), 40);
    assert!(obs.iter().all(|o| o.date.month() <= 2));

    let bodies = up.bls_bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0]["seriesid"][0], "LNS14000000");
    assert_eq!(bodies[0]["startyear"], "2005");
    assert_eq!(bodies[0]["endyear"], "2014");
    assert_eq!(bodies[1]["startyear"], "2015");
    assert!(bodies[0].get("registrationkey").is_none());

    // No BLS id: skipped without a request.
    let gdp = SeriesCatalog::new().resolve("gdp").unwrap();
    assert!(fetcher.fetch(&gdp, YearRange::single(2024)).await.is_empty());
    assert_eq!(up.bls_bodies.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_bls_table_fetcher() {
    let (base, _) = spawn_upstream().await;
    let catalog = SeriesCatalog::new();
    let fetcher = BlsTableFetcher::new(fast_client(), &base);

    let obs = fetcher.fetch(&catalog.resolve("cpi").unwrap(), YearRange::single(2024)).await;
    assert_eq!(obs.len(), 12);
    let dec = obs.iter().find(|o| o.date.month() == 12).unwrap();
    assert_eq!(dec.value, "317.6");

    // The NSA series id is answered with a block page.
    assert!(fetcher.fetch(&catalog.resolve("cpi_nsa").unwrap(), YearRange::single(2024)).await.is_empty());
}

#[tokio::test]
async fn test_configured_chain_falls_through_to_csv() {
    let (base, _) = spawn_upstream().await;

    let mut config = AppConfig::default();
    config.sources.order = vec!["fred_api".into(), "fred_csv".into()];
    config.sources.fred_api_key_env = None;
    config.sources.fred_api_url = format!("{base}/fred");
    config.sources.fred_csv_url = base.clone();

    let fetchers = build_fetchers(&config, fast_client()).unwrap();
    let chain = SourceChain::new(
        Arc::new(MemoryCache::new()),
        Arc::new(SqliteStore::in_memory().await.unwrap()),
        fetchers,
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap())),
        ChainSettings::default(),
    );
    let svc = DataService::new(Arc::new(SeriesCatalog::new()), Arc::new(chain), "it", 2);

    let resp = svc.load_envelope("unrate", Some("2024"), false).await;
    assert!(resp.success);
    assert_eq!(resp.metadata.source, Some(DataSource::BulkCsv));
    assert_eq!(resp.metadata.quality, Some(Quality::Medium));
    // The "." row is dropped by normalization.
    assert_eq!(resp.data.len(), 3);
    assert_eq!(resp.data[0].point.period, "2024-04");
    assert_eq!(svc.chain().stats().fetcher_misses, 1);
}
