//! Shared HTTP client for all fetchers.
//!
//! One `reqwest::Client` per process, with retry + exponential backoff on
//! rate limits (429), server errors (5xx) and transport failures. Scrapers
//! use the browser profile: rotating desktop user agents, browser-style
//! `Accept` headers and a randomized politeness delay between requests.
//!
//! Credentials travel as query parameters added by the request builder,
//! never inside the `url` string. Logs and errors only ever carry the
//! URL with its query string removed.

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, USER_AGENT};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const API_USER_AGENT: &str = concat!("macrofeed/", env!("CARGO_PKG_VERSION"));

const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff (ms).
    pub backoff_base_ms: u64,
    /// Politeness delay bounds before scraping a page (ms).
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base_ms: 1000,
            min_delay_ms: 1000,
            max_delay_ms: 3000,
        }
    }
}

/// Header set used for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestProfile {
    /// Plain API client identifying itself as macrofeed.
    Api,
    /// Desktop browser look-alike for HTML and CSV pages.
    Browser,
}

/// Delay before retry `attempt` (1-based).
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(2u64.pow(exp)))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SourceClient {
    http: Client,
    settings: HttpSettings,
}

impl SourceClient {
    pub fn new(settings: HttpSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(settings.timeout)
            .user_agent(API_USER_AGENT)
            .build()
            .context("Failed to build source HTTP client")?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    fn browser_user_agent() -> &'static str {
        BROWSER_USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(BROWSER_USER_AGENTS[0])
    }

    fn apply_profile(builder: RequestBuilder, profile: RequestProfile) -> RequestBuilder {
        match profile {
            RequestProfile::Api => builder.header(ACCEPT, "application/json, text/csv, */*"),
            RequestProfile::Browser => builder
                .header(USER_AGENT, Self::browser_user_agent())
                .header(ACCEPT, BROWSER_ACCEPT)
                .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
                .header(CACHE_CONTROL, "no-cache"),
        }
    }

    /// GET `url` and return the body text.
    pub async fn get_text(&self, url: &str, profile: RequestProfile) -> Result<String> {
        self.send_with_retry(url, || Self::apply_profile(self.http.get(url), profile))
            .await
    }

    /// GET `url` with `query` appended as encoded parameters.
    pub async fn get_text_with_query(
        &self,
        url: &str,
        query: &[(&str, &str)],
        profile: RequestProfile,
    ) -> Result<String> {
        self.send_with_retry(url, || {
            Self::apply_profile(self.http.get(url).query(query), profile)
        })
        .await
    }

    /// POST a JSON body to `url` and return the response text.
    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<String> {
        self.send_with_retry(url, || {
            Self::apply_profile(self.http.post(url), RequestProfile::Api).json(body)
        })
        .await
    }

    /// Send with retry + backoff. Non-retryable statuses fail immediately.
    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<String>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_retries = self.settings.max_retries;
        let url = redact(url);
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = backoff_delay(self.settings.backoff_base_ms, attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, url, "Retrying request");
                tokio::time::sleep(delay).await;
            }

            match build().send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .text()
                            .await
                            .map_err(reqwest::Error::without_url)
                            .with_context(|| format!("Failed to read body from {url}"));
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, url, "Retryable HTTP error");
                        last_error = Some(format!("HTTP {status}: {}", truncate(&error_text, 200)));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("HTTP {status} from {url}: {}", truncate(&error_text, 200));
                }
                Err(e) => {
                    let e = e.without_url();
                    warn!(attempt, url, error = %e, "Request failed");
                    last_error = Some(format!("Request error: {e}"));
                    continue;
                }
            }
        }

        anyhow::bail!(
            "{url} failed after {} retries: {}",
            max_retries,
            last_error.unwrap_or_default()
        )
    }

    /// Sleep a random interval within the configured politeness bounds.
    pub async fn polite_delay(&self) {
        let (lo, hi) = (self.settings.min_delay_ms, self.settings.max_delay_ms);
        if hi == 0 {
            return;
        }
        let ms = if lo >= hi {
            lo
        } else {
            rand::thread_rng().gen_range(lo..=hi)
        };
        debug!(delay_ms = ms, "Politeness delay");
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// `url` without its query string or fragment.
fn redact(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
