//! HTTP API: a thin axum layer over `DataService`.
//!
//! CORS is open so browser dashboards can call it directly.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

pub use routes::{ApiState, AppState};

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/indicators", get(routes::indicators))
        .route("/data/:ticker", get(routes::get_data))
        .route("/data/:ticker/raw", get(routes::get_raw))
        .route("/data/:ticker/latest", get(routes::get_latest))
        .route("/data/:ticker/summary", get(routes::get_summary))
        .route("/dashboard", get(routes::dashboard))
        .route("/alerts", get(routes::alerts))
        .route("/compare/:a/:b", get(routes::compare))
        .route("/stats", get(routes::stats))
        .route("/cache/clear", post(routes::clear_cache))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until `shutdown` resolves.
pub async fn serve<F>(state: AppState, host: &str, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid listen address {host}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "HTTP API listening on http://{addr}");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server error")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
