//! End-to-end source chain scenarios.
//!
//! Each test wires a real `SourceChain` over a temporary cache directory,
//! a manual clock and one or more `MockFetcher`s, then drives it through
//! the public service API.

use chrono::{Duration, TimeZone, Utc};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use macrofeed::catalog::SeriesCatalog;
use macrofeed::data::synthetic::SyntheticFetcher;
use macrofeed::data::Fetcher;
use macrofeed::engine::{ChainSettings, DataService, ManualClock, MemoryCache, SourceChain};
use macrofeed::error::LoadError;
use macrofeed::storage::{CacheStore, JsonFileStore, SqliteStore};
use macrofeed::types::{DataSource, LoadOutcome, Quality, Tier, YearRange};

use crate::mock_fetcher::MockFetcher;

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("macrofeed_it_{}", uuid::Uuid::new_v4()))
}

fn start_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 15, 12, 0, 0).unwrap()))
}

async fn json_store(dir: &Path) -> Arc<dyn CacheStore> {
    Arc::new(JsonFileStore::open(dir, 5).await.unwrap())
}

fn chain(store: Arc<dyn CacheStore>, fetchers: Vec<Arc<dyn Fetcher>>, clock: Arc<ManualClock>) -> SourceChain {
    SourceChain::new(Arc::new(MemoryCache::new()), store, fetchers, clock, ChainSettings::default())
}

fn service(chain: SourceChain) -> DataService {
    DataService::new(Arc::new(SeriesCatalog::new()), Arc::new(chain), "it", 4)
}

#[tokio::test]
async fn test_friendly_ticker_cold_cache_fetches_once() {
    let dir = temp_dir();
    let fetcher = MockFetcher::new("fred_csv", DataSource::BulkCsv);
    let svc = service(chain(json_store(&dir).await, vec![Arc::new(fetcher.clone())], start_clock()));

    let resp = svc.load_envelope("cpi_core", Some("2023-2024"), false).await;

    assert!(resp.success);
    assert_eq!(resp.series.as_ref().unwrap().id, "CPILFESL");
    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(fetcher.calls()[0], ("CPILFESL".to_string(), YearRange::new(2023, 2024)));
    assert_eq!(svc.chain().stats().cache_writes, 1);

    let years: BTreeSet<i32> = resp.data.iter().map(|p| p.point.year).collect();
    assert_eq!(years, BTreeSet::from([2023, 2024]));
    assert_eq!(resp.data.len(), 24);
    assert_eq!(resp.data[0].point.period, "2024-12");

    // Second call is a memory hit.
    let again = svc.load_envelope("CPILFESL", Some("2023-2024"), false).await;
    assert_eq!(again.metadata.tier, Some(Tier::Memory));
    assert_eq!(fetcher.call_count(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_disk_cache_survives_restart() {
    let dir = temp_dir();
    let clock = start_clock();

    let first = MockFetcher::new("fred_csv", DataSource::BulkCsv);
    let svc = service(chain(json_store(&dir).await, vec![Arc::new(first.clone())], clock.clone()));
    tokio_test::assert_ok!(svc.load_raw("unemployment", Some("2024"), false).await);
    assert_eq!(first.call_count(), 1);

    // New process: empty memory, same directory.
    let second = MockFetcher::new("fred_csv", DataSource::BulkCsv);
    let svc = service(chain(json_store(&dir).await, vec![Arc::new(second.clone())], clock));
    let resp = svc.load_envelope("unrate", Some("2024"), false).await;

    assert!(resp.success);
    assert_eq!(resp.metadata.tier, Some(Tier::Disk));
    assert_eq!(resp.metadata.source, Some(DataSource::BulkCsv));
    assert_eq!(resp.data.len(), 12);
    assert_eq!(second.call_count(), 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_ttl_boundary() {
    let dir = temp_dir();
    let clock = start_clock();
    let fetcher = MockFetcher::new("fred_csv", DataSource::BulkCsv);
    let svc = service(chain(json_store(&dir).await, vec![Arc::new(fetcher.clone())], clock.clone()));

    svc.load_raw("ppi", Some("2024"), false).await.unwrap();
    assert_eq!(fetcher.call_count(), 1);

    clock.advance(Duration::seconds(3599));
    svc.load_raw("ppi", Some("2024"), false).await.unwrap();
    assert_eq!(fetcher.call_count(), 1);

    clock.advance(Duration::seconds(2));
    let resp = svc.load_envelope("ppi", Some("2024"), false).await;
    assert_eq!(fetcher.call_count(), 2);
    assert_eq!(resp.metadata.tier, Some(Tier::Live));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_narrower_cache_does_not_cover_wider_request() {
    let dir = temp_dir();
    let fetcher = MockFetcher::new("fred_csv", DataSource::BulkCsv);
    let svc = service(chain(json_store(&dir).await, vec![Arc::new(fetcher.clone())], start_clock()));

    svc.load_raw("cpi", Some("2024"), false).await.unwrap();
    let wide = svc.load_raw("cpi", Some("2020-2024"), false).await.unwrap();
    assert_eq!(fetcher.call_count(), 2);
    assert_eq!(wide.len(), 60);

    // The wider snapshot now serves the narrower request.
    let narrow = svc.load_raw("cpi", Some("2022"), false).await.unwrap();
    assert_eq!(fetcher.call_count(), 2);
    assert!(narrow.iter().all(|p| p.year == 2022));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_force_refresh_bypasses_cache() {
    let dir = temp_dir();
    let fetcher = MockFetcher::new("fred_csv", DataSource::BulkCsv);
    let svc = service(chain(json_store(&dir).await, vec![Arc::new(fetcher.clone())], start_clock()));

    svc.load_raw("gdp", Some("2024"), false).await.unwrap();
    svc.load_raw("gdp", Some("2024"), true).await.unwrap();
    assert_eq!(fetcher.call_count(), 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_degraded_fallback_serves_stale_snapshot() {
    let dir = temp_dir();
    let clock = start_clock();
    let fetcher = MockFetcher::new("fred_api", DataSource::OfficialApi);
    let svc = service(chain(json_store(&dir).await, vec![Arc::new(fetcher.clone())], clock.clone()));

    let fresh = svc.load_envelope("cpi", Some("2023-2024"), false).await;
    assert_eq!(fresh.metadata.quality, Some(Quality::High));

    clock.advance(Duration::hours(5));
    fetcher.set_failing(true);

    let resp = svc.load_envelope("cpi", Some("2024"), false).await;
    assert!(resp.success);
    assert_eq!(resp.metadata.quality, Some(Quality::Degraded));
    assert_eq!(resp.metadata.source, Some(DataSource::Cached));
    assert_eq!(resp.metadata.stale_seconds, Some(5 * 3600));
    assert_eq!(resp.data.len(), 12);
    assert!(resp.data.iter().all(|p| p.point.year == 2024));
    assert_eq!(svc.chain().stats().degraded, 1);

    // Nothing cached overlaps 2010, so that request fails outright.
    let miss = svc.load_raw("cpi", Some("2010"), false).await;
    match miss {
        Err(LoadError::NoDataAvailable { series_id, attempted, .. }) => {
            assert_eq!(series_id, "CPIAUCSL");
            assert_eq!(attempted, vec!["fred_api: no data".to_string()]);
        }
        other => panic!("expected NoDataAvailable, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_stale_fallback_can_be_disabled() {
    let dir = temp_dir();
    let clock = start_clock();
    let fetcher = MockFetcher::new("fred_api", DataSource::OfficialApi);
    let settings = ChainSettings {
        serve_stale: false,
        ..ChainSettings::default()
    };
    let chain = SourceChain::new(
        Arc::new(MemoryCache::new()),
        json_store(&dir).await,
        vec![Arc::new(fetcher.clone())],
        clock.clone(),
        settings,
    );
    let svc = service(chain);

    svc.load_raw("cpi", Some("2024"), false).await.unwrap();
    clock.advance(Duration::hours(2));
    fetcher.set_failing(true);

    let resp = svc.load_envelope("cpi", Some("2024"), false).await;
    assert!(!resp.success);
    assert!(resp.error.unwrap().contains("CPIAUCSL"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_fallback_order_and_attempt_report() {
    let dir = temp_dir();
    let api = MockFetcher::failing("fred_api");
    let csv = MockFetcher::new("fred_csv", DataSource::BulkCsv);
    let table = MockFetcher::new("bls_table", DataSource::LiveScraped);
    let chain = chain(
        json_store(&dir).await,
        vec![Arc::new(api.clone()), Arc::new(csv.clone()), Arc::new(table.clone())],
        start_clock(),
    );
    let series = SeriesCatalog::new().resolve("unemployment").unwrap();

    match chain.load(&series, YearRange::single(2024), false).await {
        LoadOutcome::Success { entry, tier } => {
            assert_eq!(tier, Tier::Live);
            assert_eq!(entry.source, DataSource::BulkCsv);
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(api.call_count(), 1);
    assert_eq!(csv.call_count(), 1);
    assert_eq!(table.call_count(), 0);

    csv.set_failing(true);
    table.set_failing(true);
    match chain.load(&series, YearRange::single(1990), true).await {
        LoadOutcome::Failure(LoadError::NoDataAvailable { attempted, range, .. }) => {
            assert_eq!(range, YearRange::single(1990));
            assert_eq!(attempted.len(), 3);
            assert!(attempted[0].starts_with("fred_api"));
            assert!(attempted[1].starts_with("fred_csv"));
            assert!(attempted[2].starts_with("bls_table"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(chain.stats().failures, 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_slow_fetcher_times_out_and_next_one_answers() {
    let dir = temp_dir();
    let slow = MockFetcher::new("fred_api", DataSource::OfficialApi).with_delay(std::time::Duration::from_secs(5));
    let fast = MockFetcher::new("fred_csv", DataSource::BulkCsv);
    let settings = ChainSettings {
        fetch_timeout: std::time::Duration::from_millis(50),
        ..ChainSettings::default()
    };
    let chain = SourceChain::new(
        Arc::new(MemoryCache::new()),
        json_store(&dir).await,
        vec![Arc::new(slow.clone()), Arc::new(fast.clone())],
        start_clock(),
        settings,
    );
    let series = SeriesCatalog::new().resolve("ppi").unwrap();

    let outcome = chain.load(&series, YearRange::single(2024), false).await;
    assert_eq!(outcome.entry().unwrap().source, DataSource::BulkCsv);
    assert_eq!(slow.call_count(), 1);
    assert_eq!(fast.call_count(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_concurrent_loads_share_one_fetch() {
    let dir = temp_dir();
    let fetcher = MockFetcher::new("fred_csv", DataSource::BulkCsv).with_delay(std::time::Duration::from_millis(50));
    let svc = Arc::new(service(chain(json_store(&dir).await, vec![Arc::new(fetcher.clone())], start_clock())));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.load_raw("cpi", Some("2024"), false).await })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 12);
    }
    assert_eq!(fetcher.call_count(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_dashboard_load_many_mixes_results() {
    let dir = temp_dir();
    let fetcher = MockFetcher::new("fred_csv", DataSource::BulkCsv);
    let svc = service(chain(json_store(&dir).await, vec![Arc::new(fetcher.clone())], start_clock()));

    let tickers: Vec<String> = ["cpi", "ppi", "unemployment", "not_a_series"]
        .iter()
        .map(|t| t.to_string())
        .collect();
    let results = svc.load_many(&tickers, Some("2024")).await;

    assert_eq!(results.len(), 4);
    assert_eq!(results.iter().filter(|(_, r)| r.success).count(), 3);
    let (_, bad) = results.iter().find(|(t, _)| t == "not_a_series").unwrap();
    assert!(!bad.suggestions.is_empty());
    assert_eq!(fetcher.call_count(), 3);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_synthetic_data_is_never_cached() {
    let dir = temp_dir();
    let store = json_store(&dir).await;
    let chain = chain(
        store.clone(),
        vec![Arc::new(MockFetcher::failing("fred_api")), Arc::new(SyntheticFetcher)],
        start_clock(),
    );
    let svc = service(chain);

    let resp = svc.load_envelope("cpi", Some("2024"), false).await;
    assert!(resp.success);
    assert_eq!(resp.metadata.quality, Some(Quality::Synthetic));
    assert_eq!(resp.metadata.source, Some(DataSource::Synthetic));
    assert!(resp.metadata.cache_expires.is_none());

    assert!(store.list_series().await.unwrap().is_empty());
    assert!(svc.chain().memory().is_empty().await);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_sqlite_backend_round_trip() {
    let dir = temp_dir();
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("cache.db");
    let clock = start_clock();

    let first = MockFetcher::new("bls_api", DataSource::OfficialApi);
    let store: Arc<dyn CacheStore> = Arc::new(SqliteStore::open(&path).await.unwrap());
    let svc = service(chain(store, vec![Arc::new(first.clone())], clock.clone()));
    svc.load_raw("payrolls", Some("2023-2024"), false).await.unwrap();

    let second = MockFetcher::new("bls_api", DataSource::OfficialApi);
    let store: Arc<dyn CacheStore> = Arc::new(SqliteStore::open(&path).await.unwrap());
    let svc = service(chain(store, vec![Arc::new(second.clone())], clock));
    let resp = svc.load_envelope("PAYEMS", Some("2024"), false).await;

    assert_eq!(resp.metadata.tier, Some(Tier::Disk));
    assert_eq!(resp.metadata.source, Some(DataSource::OfficialApi));
    assert_eq!(resp.data.len(), 12);
    assert_eq!(second.call_count(), 0);

    let (memory, disk) = svc.clear_cache().await.unwrap();
    assert_eq!((memory, disk), (1, 1));

    let _ = std::fs::remove_dir_all(&dir);
}
