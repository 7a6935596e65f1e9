//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. Every
//! field has a default, so a missing file still yields a usable config.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime into `SecretString`s.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::data::http::HttpSettings;
use crate::engine::alerts::AlertThresholds;
use crate::storage::StorageBackend;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub sources: SourcesConfig,
    pub loader: LoaderConfig,
    pub server: ServerConfig,
    /// Basis-point thresholds for change alerts.
    pub alerts: AlertThresholds,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub api_version: String,
    /// Tickers preloaded at start-up.
    pub warmup_tickers: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "macrofeed".into(),
            api_version: env!("CARGO_PKG_VERSION").into(),
            warmup_tickers: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub ttl_secs: u64,
    pub backend: StorageBackend,
    /// Database file name inside `dir` for the sqlite backend.
    pub sqlite_file: String,
    /// Timestamped JSON snapshots kept per series.
    pub keep_snapshots: usize,
    /// Serve a stale snapshot when every live source fails.
    pub serve_stale: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data_cache"),
            ttl_secs: crate::types::DEFAULT_TTL_SECS,
            backend: StorageBackend::Json,
            sqlite_file: "macrofeed.db".into(),
            keep_snapshots: 10,
            serve_stale: true,
        }
    }
}

impl CacheConfig {
    pub fn sqlite_path(&self) -> PathBuf {
        self.dir.join(&self.sqlite_file)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub min_scrape_delay_ms: u64,
    pub max_scrape_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 1000,
            min_scrape_delay_ms: 1000,
            max_scrape_delay_ms: 3000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SourcesConfig {
    /// Fetcher names in priority order.
    pub order: Vec<String>,
    /// Append the synthetic generator as a last resort.
    pub allow_synthetic: bool,
    pub fred_api_key_env: Option<String>,
    pub bls_api_key_env: Option<String>,
    pub fred_api_url: String,
    pub bls_api_url: String,
    pub fred_csv_url: String,
    pub bls_table_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            order: vec![
                "fred_api".into(),
                "bls_api".into(),
                "fred_csv".into(),
                "bls_table".into(),
            ],
            allow_synthetic: false,
            fred_api_key_env: Some("FRED_API_KEY".into()),
            bls_api_key_env: Some("BLS_API_KEY".into()),
            fred_api_url: crate::data::fred_api::DEFAULT_BASE_URL.into(),
            bls_api_url: crate::data::bls_api::DEFAULT_BASE_URL.into(),
            fred_csv_url: crate::data::fred_csv::DEFAULT_BASE_URL.into(),
            bls_table_url: crate::data::bls_table::DEFAULT_BASE_URL.into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoaderConfig {
    /// Concurrent series loads for multi-series requests.
    pub max_workers: usize,
    /// Time box for one fetcher attempt.
    pub fetch_timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            fetch_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for the `limit` query parameter.
    pub max_results: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            max_results: 1000,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise defaults. Environment overrides
    /// are applied and the result validated either way.
    pub fn load_or_default(path: &str) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::load(path)?
        } else {
            info!(path, "No config file found, using defaults");
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MACROFEED_*` overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid value for {name}: {raw:?}"))
        }

        if let Some(v) = lookup("MACROFEED_CACHE_DIR") {
            self.cache.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MACROFEED_CACHE_TTL") {
            self.cache.ttl_secs = parse("MACROFEED_CACHE_TTL", &v)?;
        }
        if let Some(v) = lookup("MACROFEED_HTTP_TIMEOUT") {
            self.http.timeout_secs = parse("MACROFEED_HTTP_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("MACROFEED_MAX_RETRIES") {
            self.http.max_retries = parse("MACROFEED_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("MACROFEED_MAX_WORKERS") {
            self.loader.max_workers = parse("MACROFEED_MAX_WORKERS", &v)?;
        }
        if let Some(v) = lookup("MACROFEED_PORT") {
            self.server.port = parse("MACROFEED_PORT", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 {
            anyhow::bail!("cache.ttl_secs must be greater than zero");
        }
        if self.loader.max_workers == 0 {
            anyhow::bail!("loader.max_workers must be greater than zero");
        }
        if self.http.timeout_secs == 0 || self.loader.fetch_timeout_secs == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        if self.http.min_scrape_delay_ms > self.http.max_scrape_delay_ms {
            anyhow::bail!(
                "http.min_scrape_delay_ms ({}) exceeds http.max_scrape_delay_ms ({})",
                self.http.min_scrape_delay_ms,
                self.http.max_scrape_delay_ms
            );
        }
        if !self.alerts.is_ordered() {
            anyhow::bail!(
                "alerts thresholds must satisfy 0 < info_bps <= warning_bps <= critical_bps (got {}/{}/{})",
                self.alerts.info_bps,
                self.alerts.warning_bps,
                self.alerts.critical_bps
            );
        }
        if self.sources.order.is_empty() && !self.sources.allow_synthetic {
            anyhow::bail!("sources.order is empty and synthetic data is disabled");
        }
        Ok(())
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(self.http.timeout_secs),
            max_retries: self.http.max_retries,
            backoff_base_ms: self.http.backoff_base_ms,
            min_delay_ms: self.http.min_scrape_delay_ms,
            max_delay_ms: self.http.max_scrape_delay_ms,
        }
    }

    pub fn fred_api_key(&self) -> Option<SecretString> {
        self.sources.fred_api_key_env.as_deref().and_then(Self::resolve_secret)
    }

    pub fn bls_api_key(&self) -> Option<SecretString> {
        self.sources.bls_api_key_env.as_deref().and_then(Self::resolve_secret)
    }

    /// Resolve an environment variable name to a secret. Unset or blank is `None`.
    fn resolve_secret(env_name: &str) -> Option<SecretString> {
        match Self::resolve_env(env_name) {
            Ok(v) if !v.trim().is_empty() => Some(SecretString::new(v.trim().to_string())),
            Ok(_) => None,
            Err(e) => {
                warn!(env = env_name, error = %e, "API key not available");
                None
            }
        }
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
