//! Rate-limited Discogs API client.
//!
//! Single chokepoint for every outbound catalog call: all requests await
//! the shared [`RateGate`] first, so throughput stays bounded no matter how
//! many matching jobs run concurrently. Failures are classified into the
//! [`EnrichError`] taxonomy here; callers never inspect HTTP statuses.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EnrichError;
use crate::throttle::RateGate;

const DISCOGS_API: &str = "https://api.discogs.com";

/// Minimum spacing between any two outbound calls, across all callers.
const MIN_CALL_INTERVAL: Duration = Duration::from_millis(1300);

/// Wait after a 429 before the single in-client retry.
const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(8);

const SEARCH_PAGE_SIZE: u32 = 25;

/// Static bearer token plus identifying user agent, read from process
/// configuration once at startup.
#[derive(Debug, Clone)]
pub struct DiscogsConfig {
    pub token: String,
    pub user_agent: String,
}

impl DiscogsConfig {
    pub const TOKEN_ENV: &'static str = "WAXLINE_DISCOGS_TOKEN";
    pub const USER_AGENT_ENV: &'static str = "WAXLINE_USER_AGENT";

    pub fn from_env() -> Result<Self, EnrichError> {
        let token = std::env::var(Self::TOKEN_ENV)
            .map_err(|_| EnrichError::Config(format!("{} not set", Self::TOKEN_ENV)))?;
        let user_agent = std::env::var(Self::USER_AGENT_ENV)
            .unwrap_or_else(|_| format!("waxline/{}", env!("CARGO_PKG_VERSION")));
        Ok(Self { token, user_agent })
    }
}

/// One entry of a search result page. `title` is Discogs' combined
/// "Artist - Title" display string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub master_id: Option<i64>,
}

impl SearchHit {
    pub fn year_as_i32(&self) -> Option<i32> {
        self.year.as_deref().and_then(|y| y.trim().parse().ok())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub uri150: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    #[serde(default)]
    pub average: Option<f64>,
    #[serde(default)]
    pub count: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    #[serde(default)]
    pub rating: Option<Rating>,
}

/// Full release document from the get-by-id endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseDoc {
    pub id: i64,
    #[serde(default)]
    pub master_id: Option<i64>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub labels: Vec<LabelRef>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub community: Option<Community>,
}

/// Master-release document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterDoc {
    pub id: i64,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub year: Option<i32>,
}

/// One search attempt's parameters.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub artist: String,
    pub title: String,
    pub year: Option<i32>,
    pub label: Option<String>,
    pub catalog_number: Option<String>,
}

impl SearchQuery {
    pub fn new(artist: &str, title: &str, year: Option<i32>) -> Self {
        Self {
            artist: artist.to_string(),
            title: title.to_string(),
            year,
            label: None,
            catalog_number: None,
        }
    }
}

/// The catalog operations the matcher needs. Seam for offline tests.
#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, EnrichError>;
    async fn get_release(&self, external_id: i64) -> Result<ReleaseDoc, EnrichError>;
    async fn get_master(&self, external_id: i64) -> Result<MasterDoc, EnrichError>;
}

pub struct DiscogsClient {
    http: reqwest::Client,
    gate: RateGate,
    base_url: String,
    config: Option<DiscogsConfig>,
}

impl DiscogsClient {
    pub fn new(http: reqwest::Client, config: Option<DiscogsConfig>) -> Self {
        Self::with_interval(http, config, MIN_CALL_INTERVAL)
    }

    pub fn with_interval(
        http: reqwest::Client,
        config: Option<DiscogsConfig>,
        min_interval: Duration,
    ) -> Self {
        Self {
            http,
            gate: RateGate::new(min_interval),
            base_url: DISCOGS_API.to_string(),
            config,
        }
    }

    /// Read credentials from the environment; a client built from an
    /// unconfigured environment fails every call with a config error.
    pub fn from_env(http: reqwest::Client) -> Self {
        Self::new(http, DiscogsConfig::from_env().ok())
    }

    fn config(&self) -> Result<&DiscogsConfig, EnrichError> {
        self.config
            .as_ref()
            .ok_or_else(|| EnrichError::Config(format!("{} not set", DiscogsConfig::TOKEN_ENV)))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, EnrichError> {
        let cfg = self.config()?;
        let mut retried = false;
        loop {
            self.gate.wait().await;
            let resp = self
                .http
                .get(format!("{}{path}", self.base_url))
                .query(query)
                .header("Authorization", format!("Discogs token={}", cfg.token))
                .header("User-Agent", &cfg.user_agent)
                .send()
                .await
                .map_err(|e| EnrichError::Temporary(format!("request failed: {e}")))?;

            let status = resp.status();
            if status.as_u16() == 429 {
                if retried {
                    return Err(EnrichError::Temporary("rate limited after retry".into()));
                }
                retried = true;
                tracing::debug!(path, "rate limited, cooling down");
                tokio::time::sleep(RATE_LIMIT_COOLDOWN).await;
                continue;
            }
            if matches!(status.as_u16(), 502 | 503 | 504) {
                return Err(EnrichError::Temporary(format!("upstream {status}")));
            }
            if !status.is_success() {
                return Err(EnrichError::Fatal(format!("discogs HTTP {status}")));
            }

            let body = resp
                .text()
                .await
                .map_err(|e| EnrichError::Temporary(format!("body read failed: {e}")))?;
            return parse_json_body(&body);
        }
    }
}

/// Parse a 2xx body, classifying HTML as temporary. Discogs serves HTML
/// interstitials with a 200 during incidents, and those must never be
/// mistaken for "zero results".
fn parse_json_body<T: DeserializeOwned>(body: &str) -> Result<T, EnrichError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        return Err(EnrichError::Temporary(
            "HTML body where JSON expected".into(),
        ));
    }
    serde_json::from_str(trimmed).map_err(|e| EnrichError::Temporary(format!("malformed body: {e}")))
}

/// Structured fields plus a combined free-text fallback term.
fn search_params(query: &SearchQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("type", "release".to_string()),
        ("per_page", SEARCH_PAGE_SIZE.to_string()),
        ("artist", query.artist.clone()),
        ("release_title", query.title.clone()),
        ("q", format!("{} {}", query.artist, query.title)),
    ];
    if let Some(year) = query.year {
        params.push(("year", year.to_string()));
    }
    if let Some(ref label) = query.label {
        params.push(("label", label.clone()));
    }
    if let Some(ref catno) = query.catalog_number {
        params.push(("catno", catno.clone()));
    }
    params
}

#[async_trait::async_trait]
impl Catalog for DiscogsClient {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, EnrichError> {
        let response: SearchResponse = self
            .fetch("/database/search", &search_params(query))
            .await?;
        Ok(response.results)
    }

    async fn get_release(&self, external_id: i64) -> Result<ReleaseDoc, EnrichError> {
        self.fetch(&format!("/releases/{external_id}"), &[]).await
    }

    async fn get_master(&self, external_id: i64) -> Result<MasterDoc, EnrichError> {
        self.fetch(&format!("/masters/{external_id}"), &[]).await
    }
}
