use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ApiConfig, RetryPolicy};
use crate::hierarchy::SectionKey;

const USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
const REFERER: &str = "https://elezioni.interno.gov.it/";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("HTTP {0}")]
    Status(StatusCode),
    #[error("invalid response body: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl FetchError {
    /// Connectivity problems and overload statuses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Connect(_) => true,
            FetchError::Status(s) => matches!(s.as_u16(), 429 | 500 | 502 | 503 | 504),
            FetchError::Decode(_) | FetchError::Request(_) => false,
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            FetchError::Connect(e)
        } else if e.is_decode() {
            FetchError::Decode(e)
        } else {
            FetchError::Request(e)
        }
    }
}

/// Per-section document kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Document {
    Tally,
    Preferences,
}

impl Document {
    fn endpoint(self) -> &'static str {
        match self {
            Document::Tally => "scrutiniR",
            Document::Preferences => "getprefeR",
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Document::Tally => "tally",
            Document::Preferences => "preferences",
        })
    }
}

/// HTTP client for the election results API, with its retry policy.
pub struct ApiClient {
    http: reqwest::Client,
    api: ApiConfig,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(api: ApiConfig, retry: RetryPolicy) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(header::REFERER, HeaderValue::from_static(REFERER));

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(api.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http, api, retry })
    }

    fn election_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/DE/{}/TE/{}/RE/{}",
            self.api.base_url.trim_end_matches('/'),
            endpoint,
            self.api.election_date,
            self.api.election_type,
            self.api.region
        )
    }

    pub fn entities_url(&self) -> String {
        self.election_url("getentiRZ")
    }

    pub fn section_url(&self, doc: Document, key: &SectionKey) -> String {
        format!(
            "{}/PR/{}/CM/{}/SZ/{}",
            self.election_url(doc.endpoint()),
            key.province,
            key.municipality,
            key.section
        )
    }

    /// Fetch the full entity list. Failure here is fatal for a run.
    pub async fn fetch_entities(&self) -> Result<Value> {
        let url = self.entities_url();
        self.get_with_retry(&url, self.api.list_timeout)
            .await
            .with_context(|| format!("Failed to fetch entity list from {}", url))
    }

    /// Fetch one section document, degrading any failure to `None`.
    pub async fn fetch_section(&self, doc: Document, key: &SectionKey) -> Option<Value> {
        let url = self.section_url(doc, key);
        match self.get_with_retry(&url, self.api.request_timeout).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Giving up on {} for section {}: {}", doc, key, e);
                None
            }
        }
    }

    async fn get_with_retry(&self, url: &str, timeout: Duration) -> Result<Value, FetchError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.get_json(url, timeout).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let wait = self.retry.delay_after(attempt);
                    warn!(
                        "{} on {} (attempt {}/{}), retrying in {:.1}s",
                        e,
                        url,
                        attempt,
                        max_attempts,
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, FetchError> {
        debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        response.json().await.map_err(FetchError::from_reqwest)
    }
}
