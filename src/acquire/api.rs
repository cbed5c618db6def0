// src/acquire/api.rs
//! Structured search API backend (X API v2 recent search).
//!
//! State machine: `Idle → Authenticated → Querying → {Throttled, Idle}`.
//! Paging resumes from the last good cursor after a throttle; more than
//! `max_throttle_cycles` consecutive rate-limit responses end the call with a
//! partial result.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use metrics::counter;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::query::{lookback_start, with_operator, API_EXCLUDE_REPOSTS};
use super::types::{Backend, FetchOutcome};
use crate::config::{ApiSection, Credentials};
use crate::error::AcquireError;
use crate::model::{Engagement, RawPost};

/// Upstream page size bounds for recent search.
const MIN_PAGE: usize = 10;
const MAX_PAGE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiState {
    Idle,
    Authenticated,
    Querying,
    Throttled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("rate limited (reset at {reset_at:?})")]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transport: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport(err.without_url().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub max_results: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub cursor: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub posts: Vec<RawPost>,
    pub next_cursor: Option<String>,
}

/// The wire surface the backend drives. `HttpSearchApi` talks to the real
/// service; tests script their own.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Validate credentials without consuming result quota where possible.
    async fn verify(&self) -> Result<(), ApiError>;

    async fn search_page(&self, req: &SearchRequest<'_>) -> Result<SearchPage, ApiError>;
}

/// Rate-limit bookkeeping shared by concurrent `fetch` calls.
#[derive(Debug)]
struct RateState {
    state: ApiState,
    throttle_cycles_total: u64,
    last_reset_at: Option<DateTime<Utc>>,
}

pub struct ApiBackend<S> {
    api: S,
    cfg: ApiSection,
    lookback_days: u32,
    rate: Mutex<RateState>,
}

impl<S: SearchApi> ApiBackend<S> {
    /// Validate credentials and move to `Authenticated`. Bad credentials fail
    /// fast with `AcquireError::Authentication`.
    pub async fn connect(api: S, cfg: ApiSection) -> Result<Self, AcquireError> {
        match api.verify().await {
            Ok(()) => {}
            // Throttled on the probe still means the token was accepted.
            Err(ApiError::RateLimited { .. }) => {
                debug!(target: "acquire", "credential probe rate limited; treating as valid");
            }
            Err(ApiError::Unauthorized(msg)) => return Err(AcquireError::Authentication(msg)),
            Err(ApiError::Transport(msg)) => return Err(AcquireError::Transport(msg)),
        }
        info!(target: "acquire", backend = "api", "authenticated");
        Ok(Self {
            api,
            cfg,
            lookback_days: 0,
            rate: Mutex::new(RateState {
                state: ApiState::Authenticated,
                throttle_cycles_total: 0,
                last_reset_at: None,
            }),
        })
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    pub fn state(&self) -> ApiState {
        self.lock_rate().state
    }

    /// Throttle cycles entered since construction, across all calls.
    pub fn throttle_cycles_total(&self) -> u64 {
        self.lock_rate().throttle_cycles_total
    }

    fn lock_rate(&self) -> std::sync::MutexGuard<'_, RateState> {
        self.rate.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ApiState) {
        self.lock_rate().state = state;
    }

    fn enter_throttle(&self, reset_at: Option<DateTime<Utc>>) -> Duration {
        let mut rate = self.lock_rate();
        rate.state = ApiState::Throttled;
        rate.throttle_cycles_total += 1;
        rate.last_reset_at = reset_at;
        drop(rate);
        throttle_wait(reset_at, Utc::now(), &self.cfg)
    }

    fn page_size(&self, remaining: usize) -> usize {
        remaining
            .min(self.cfg.page_size)
            .clamp(MIN_PAGE, MAX_PAGE)
    }
}

/// Sleep until the reported reset, bounded by `max_throttle_wait_secs`;
/// no reset time → `fallback_wait_secs`.
fn throttle_wait(reset_at: Option<DateTime<Utc>>, now: DateTime<Utc>, cfg: &ApiSection) -> Duration {
    let cap = Duration::from_secs(cfg.max_throttle_wait_secs);
    let wait = match reset_at {
        Some(at) => (at - now).to_std().unwrap_or(Duration::ZERO),
        None => Duration::from_secs(cfg.fallback_wait_secs),
    };
    wait.min(cap)
}

#[async_trait]
impl<S: SearchApi> Backend for ApiBackend<S> {
    async fn fetch(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, AcquireError> {
        let q = with_operator(query, API_EXCLUDE_REPOSTS);
        let start_time = lookback_start(Utc::now(), self.lookback_days);
        let max_cycles = self.cfg.max_throttle_cycles;

        let mut posts: Vec<RawPost> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut cycles = 0u32;
        let mut pages = 0usize;

        self.set_state(ApiState::Querying);
        let outcome = loop {
            if posts.len() >= limit {
                break FetchOutcome::Complete(posts);
            }
            if cancel.is_cancelled() {
                self.set_state(ApiState::Idle);
                return Err(AcquireError::Cancelled);
            }

            let res = {
                let req = SearchRequest {
                    query: &q,
                    max_results: self.page_size(limit - posts.len()),
                    start_time,
                    cursor: cursor.as_deref(),
                };
                self.api.search_page(&req).await
            };

            match res {
                Ok(page) => {
                    cycles = 0;
                    pages += 1;
                    for p in page.posts {
                        if posts.len() >= limit {
                            break;
                        }
                        if seen.insert(p.source_id.clone()) {
                            posts.push(p);
                        }
                    }
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => break FetchOutcome::Complete(posts),
                    }
                }
                Err(ApiError::RateLimited { reset_at }) => {
                    cycles += 1;
                    counter!("acquire_throttle_total").increment(1);
                    if cycles > max_cycles {
                        warn!(
                            target: "acquire",
                            backend = "api",
                            reason = "rate_limit",
                            cycles = max_cycles,
                            kept = posts.len(),
                            "rate limit persisted; returning partial results"
                        );
                        break FetchOutcome::Partial {
                            posts,
                            cause: AcquireError::RateLimitExceeded { cycles: max_cycles },
                        };
                    }
                    let wait = self.enter_throttle(reset_at);
                    info!(
                        target: "acquire",
                        backend = "api",
                        cycle = cycles,
                        wait_ms = wait.as_millis() as u64,
                        "throttled"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.set_state(ApiState::Idle);
                            return Err(AcquireError::Cancelled);
                        }
                        _ = tokio::time::sleep(wait) => {}
                    }
                    self.set_state(ApiState::Querying);
                }
                Err(ApiError::Unauthorized(msg)) => {
                    warn!(
                        target: "acquire",
                        backend = "api",
                        reason = "auth",
                        kept = posts.len(),
                        "credentials rejected mid-fetch"
                    );
                    break FetchOutcome::Partial {
                        posts,
                        cause: AcquireError::Authentication(msg),
                    };
                }
                Err(ApiError::Transport(msg)) => {
                    warn!(
                        target: "acquire",
                        backend = "api",
                        reason = "transport",
                        error = %msg,
                        kept = posts.len(),
                        "page request failed"
                    );
                    break FetchOutcome::Partial {
                        posts,
                        cause: AcquireError::Transport(msg),
                    };
                }
            }
        };

        self.set_state(ApiState::Idle);
        debug!(target: "acquire", backend = "api", pages, kept = outcome.posts().len(), "fetch done");
        Ok(outcome)
    }

    fn name(&self) -> &'static str {
        "api"
    }
}

// ---------------- HTTP implementation ----------------

pub struct HttpSearchApi {
    client: reqwest::Client,
    base_url: String,
    credentials: Credentials,
}

impl HttpSearchApi {
    pub fn new(cfg: &ApiSection, credentials: Credentials) -> Result<Self, AcquireError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(concat!("complaint-miner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn search_url(&self) -> String {
        format!("{}/2/tweets/search/recent", self.base_url)
    }

    async fn get(&self, params: &[(&str, String)]) -> Result<reqwest::Response, ApiError> {
        let resp = self
            .client
            .get(self.search_url())
            .bearer_auth(self.credentials.expose())
            .query(params)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let reset_at = resp
                .headers()
                .get("x-rate-limit-reset")
                .and_then(|v| v.to_str().ok())
                .and_then(parse_reset_header);
            return Err(ApiError::RateLimited { reset_at });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(format!("status {}", status.as_u16())));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            let message: String = message.chars().take(200).collect();
            return Err(ApiError::Transport(format!(
                "status {}: {message}",
                status.as_u16()
            )));
        }
        Ok(resp)
    }
}

fn parse_reset_header(v: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = v.trim().parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<TweetDto>,
    #[serde(default)]
    meta: Option<MetaDto>,
}

#[derive(Debug, Deserialize)]
struct MetaDto {
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TweetDto {
    id: String,
    text: String,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    public_metrics: Option<MetricsDto>,
}

#[derive(Debug, Default, Deserialize)]
struct MetricsDto {
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
}

impl TweetDto {
    fn into_post(self, fetched_at: DateTime<Utc>) -> RawPost {
        let m = self.public_metrics.unwrap_or_default();
        RawPost {
            source_id: self.id,
            author_id: self.author_id.unwrap_or_default(),
            text: self.text,
            created_at: self.created_at.unwrap_or(fetched_at),
            engagement: Engagement {
                likes: m.like_count,
                reposts: m.retweet_count,
                replies: m.reply_count,
            },
        }
    }
}

fn parse_search_body(body: &str, fetched_at: DateTime<Utc>) -> Result<SearchPage, ApiError> {
    let resp: SearchResponse = serde_json::from_str(body)
        .map_err(|e| ApiError::Transport(format!("invalid search response: {e}")))?;
    Ok(SearchPage {
        posts: resp.data.into_iter().map(|t| t.into_post(fetched_at)).collect(),
        next_cursor: resp.meta.and_then(|m| m.next_token),
    })
}

#[async_trait]
impl SearchApi for HttpSearchApi {
    async fn verify(&self) -> Result<(), ApiError> {
        if self.credentials.is_empty() {
            return Err(ApiError::Unauthorized("missing bearer token".into()));
        }
        let params = [
            ("query", "twitter".to_string()),
            ("max_results", MIN_PAGE.to_string()),
        ];
        self.get(&params).await.map(|_| ())
    }

    async fn search_page(&self, req: &SearchRequest<'_>) -> Result<SearchPage, ApiError> {
        let mut params = vec![
            ("query", req.query.to_string()),
            ("max_results", req.max_results.to_string()),
            ("tweet.fields", "created_at,author_id,public_metrics,lang".to_string()),
        ];
        if let Some(start) = req.start_time {
            params.push(("start_time", start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)));
        }
        if let Some(c) = req.cursor {
            params.push(("next_token", c.to_string()));
        }
        let body = self.get(&params).await?.text().await?;
        parse_search_body(&body, Utc::now())
    }
}
