// src/acquire/browser.rs
//! Browser-automation backend: renders the web search page and scrapes posts.
//!
//! State machine: `Idle → SessionStarting → Searching → Scrolling ⇄ Extracting → Closed`,
//! with any state able to drop to `Degraded` on a detection signal (empty result
//! DOM, block page). Degraded sessions are torn down and re-established up to
//! `session_retries` times with exponential backoff.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use rand::Rng;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::query::{lookback_start, since_operator, with_operator, BROWSER_EXCLUDE_REPOSTS};
use super::types::{Backend, FetchOutcome};
use crate::config::{BrowserSection, Credentials};
use crate::error::AcquireError;
use crate::model::{Engagement, RawPost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserState {
    Idle,
    SessionStarting,
    Searching,
    Scrolling,
    Extracting,
    Degraded,
    Closed,
}

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

const VIEWPORTS: &[(u32, u32)] = &[(1366, 768), (1440, 900), (1536, 864), (1920, 1080)];

/// Page text that means the site is refusing us.
const BLOCK_MARKERS: &[&str] = &[
    "captcha",
    "unusual activity",
    "rate limit exceeded",
    "access denied",
    "something went wrong. try reloading",
];

/// Scroll passes in a row without new posts before the feed counts as exhausted.
const STAGNANT_PASSES: u32 = 2;

/// Per-session browser identity. Drawn once when a session starts and kept
/// for the whole session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintProfile {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub locale: String,
    pub suppress_automation_flags: bool,
}

impl FingerprintProfile {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let ua = USER_AGENTS[rng.random_range(0..USER_AGENTS.len())];
        let viewport = VIEWPORTS[rng.random_range(0..VIEWPORTS.len())];
        Self {
            user_agent: ua.to_string(),
            viewport,
            locale: "en-US".into(),
            suppress_automation_flags: true,
        }
    }
}

/// One exclusive automation session. Returned HTML is the rendered DOM.
#[async_trait]
pub trait BrowserSession: Send {
    async fn open_search(&mut self, url: &str) -> Result<String, AcquireError>;

    /// Scroll/interact once and return the DOM afterwards.
    async fn scroll(&mut self) -> Result<String, AcquireError>;

    /// Release the session. Must be safe to call on any path.
    async fn close(&mut self);
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    type Session: BrowserSession;

    async fn start_session(&self, profile: &FingerprintProfile)
        -> Result<Self::Session, AcquireError>;
}

/// Why a session ended early.
enum SessionEnd {
    Degraded(String),
    Cancelled,
}

pub struct BrowserBackend<D> {
    driver: D,
    cfg: BrowserSection,
    lookback_days: u32,
    state: Mutex<BrowserState>,
}

impl<D: BrowserDriver> BrowserBackend<D> {
    pub fn new(driver: D, cfg: BrowserSection) -> Self {
        Self {
            driver,
            cfg,
            lookback_days: 0,
            state: Mutex::new(BrowserState::Idle),
        }
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    /// Last state entered by any session of this backend.
    pub fn state(&self) -> BrowserState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, s: BrowserState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = s;
        debug!(target: "acquire", backend = "browser", state = ?s, "state");
    }

    pub fn search_url(&self, query: &str) -> Result<String, AcquireError> {
        let mut q = with_operator(query, BROWSER_EXCLUDE_REPOSTS);
        if let Some(start) = lookback_start(Utc::now(), self.lookback_days) {
            q = with_operator(&q, &since_operator(start));
        }
        let url = url::Url::parse_with_params(
            &self.cfg.search_url,
            &[("q", q.as_str()), ("src", "typed_query"), ("f", "live")],
        )
        .map_err(|e| AcquireError::Transport(format!("bad search_url: {e}")))?;
        Ok(url.into())
    }

    // Random draws stay in sync fns so the RNG never lives across an await.
    fn draw_profile(&self) -> FingerprintProfile {
        FingerprintProfile::random(&mut rand::rng())
    }

    fn pacing_delay(&self) -> Duration {
        let lo = self.cfg.min_delay_ms;
        let hi = self.cfg.max_delay_ms.max(lo);
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.cfg.backoff_base_ms.saturating_mul(factor))
    }

    /// Drive one session until `limit` posts, feed exhaustion, pass budget,
    /// degradation or cancellation.
    async fn drive(
        &self,
        session: &mut D::Session,
        url: &str,
        limit: usize,
        cancel: &CancellationToken,
        posts: &mut Vec<RawPost>,
        seen: &mut HashSet<String>,
    ) -> Result<(), SessionEnd> {
        self.set_state(BrowserState::Searching);
        let html = session
            .open_search(url)
            .await
            .map_err(|e| SessionEnd::Degraded(e.to_string()))?;
        self.set_state(BrowserState::Extracting);
        let first = extract_posts(&html);
        if first.is_empty() {
            let signal = detect_block(&html).unwrap_or_else(|| "empty result DOM".into());
            return Err(SessionEnd::Degraded(signal));
        }
        merge(posts, seen, first, limit);

        let mut passes = 0u32;
        let mut stagnant = 0u32;
        while posts.len() < limit && passes < self.cfg.max_passes {
            if cancel.is_cancelled() {
                return Err(SessionEnd::Cancelled);
            }
            let delay = self.pacing_delay();
            tokio::select! {
                _ = cancel.cancelled() => return Err(SessionEnd::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            self.set_state(BrowserState::Scrolling);
            let html = session
                .scroll()
                .await
                .map_err(|e| SessionEnd::Degraded(e.to_string()))?;

            self.set_state(BrowserState::Extracting);
            let batch = extract_posts(&html);
            if batch.is_empty() {
                if let Some(signal) = detect_block(&html) {
                    return Err(SessionEnd::Degraded(signal));
                }
            }
            let added = merge(posts, seen, batch, limit);
            passes += 1;
            if added == 0 {
                stagnant += 1;
                if stagnant >= STAGNANT_PASSES {
                    debug!(target: "acquire", backend = "browser", passes, "feed exhausted");
                    break;
                }
            } else {
                stagnant = 0;
            }
        }
        Ok(())
    }
}

/// Append unseen posts up to `limit`; returns how many were added.
fn merge(
    posts: &mut Vec<RawPost>,
    seen: &mut HashSet<String>,
    batch: Vec<RawPost>,
    limit: usize,
) -> usize {
    let before = posts.len();
    for p in batch {
        if posts.len() >= limit {
            break;
        }
        if seen.insert(p.source_id.clone()) {
            posts.push(p);
        }
    }
    posts.len() - before
}

#[async_trait]
impl<D: BrowserDriver> Backend for BrowserBackend<D> {
    async fn fetch(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, AcquireError> {
        if limit == 0 {
            return Ok(FetchOutcome::Complete(Vec::new()));
        }
        let url = match self.search_url(query) {
            Ok(u) => u,
            Err(e) => {
                return Ok(FetchOutcome::Partial {
                    posts: Vec::new(),
                    cause: e,
                })
            }
        };

        let mut posts = Vec::new();
        let mut seen = HashSet::new();
        let mut attempt = 0u32;

        loop {
            if cancel.is_cancelled() {
                self.set_state(BrowserState::Idle);
                return Err(AcquireError::Cancelled);
            }

            self.set_state(BrowserState::SessionStarting);
            let profile = self.draw_profile();
            let end = match self.driver.start_session(&profile).await {
                Ok(mut session) => {
                    let res = self
                        .drive(&mut session, &url, limit, cancel, &mut posts, &mut seen)
                        .await;
                    session.close().await;
                    self.set_state(BrowserState::Closed);
                    res
                }
                Err(e) => Err(SessionEnd::Degraded(e.to_string())),
            };

            let signal = match end {
                Ok(()) => return Ok(FetchOutcome::Complete(posts)),
                Err(SessionEnd::Cancelled) => return Err(AcquireError::Cancelled),
                Err(SessionEnd::Degraded(signal)) => signal,
            };

            self.set_state(BrowserState::Degraded);
            counter!("acquire_blocked_total").increment(1);
            if attempt >= self.cfg.session_retries {
                warn!(
                    target: "acquire",
                    backend = "browser",
                    reason = "blocked",
                    attempts = attempt + 1,
                    signal = %signal,
                    kept = posts.len(),
                    "acquisition blocked; returning partial results"
                );
                return Ok(FetchOutcome::Partial {
                    posts,
                    cause: AcquireError::AcquisitionBlocked {
                        attempts: attempt + 1,
                        signal,
                    },
                });
            }

            let wait = self.backoff(attempt);
            attempt += 1;
            info!(
                target: "acquire",
                backend = "browser",
                attempt,
                wait_ms = wait.as_millis() as u64,
                signal = %signal,
                "session degraded; retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

// ---------------- DOM extraction ----------------

struct Selectors {
    article: Selector,
    text: Selector,
    time: Selector,
    status_link: Selector,
    like: Selector,
    repost: Selector,
    reply: Selector,
}

static SEL: Lazy<Selectors> = Lazy::new(|| {
    let s = |css: &str| Selector::parse(css).expect("static selector");
    Selectors {
        article: s(r#"article[data-testid="tweet"]"#),
        text: s(r#"div[data-testid="tweetText"]"#),
        time: s("time[datetime]"),
        status_link: s(r#"a[href*="/status/"]"#),
        like: s(r#"[data-testid="like"], [data-testid="unlike"]"#),
        repost: s(r#"[data-testid="retweet"], [data-testid="unretweet"]"#),
        reply: s(r#"[data-testid="reply"]"#),
    }
});

/// Returns the matching marker if the page looks like a block/challenge page.
/// Only consulted for pages without post cards: complaint text mentions
/// captchas and access errors all the time.
pub fn detect_block(html: &str) -> Option<String> {
    let lower = html.to_lowercase();
    BLOCK_MARKERS
        .iter()
        .find(|m| lower.contains(*m))
        .map(|m| format!("block page: {m}"))
}

/// Scrape post cards from a rendered search page. Cards without a status
/// link are skipped; they cannot be keyed.
pub fn extract_posts(html: &str) -> Vec<RawPost> {
    let doc = Html::parse_document(html);
    let fetched_at = Utc::now();
    doc.select(&SEL.article)
        .filter_map(|card| extract_card(card, fetched_at))
        .collect()
}

fn extract_card(card: ElementRef<'_>, fetched_at: DateTime<Utc>) -> Option<RawPost> {
    let (author_id, source_id) = card
        .select(&SEL.status_link)
        .filter_map(|a| a.value().attr("href"))
        .find_map(parse_status_href)?;

    let text = card
        .select(&SEL.text)
        .next()
        .map(|t| t.text().collect::<String>())
        .unwrap_or_default();

    let created_at = card
        .select(&SEL.time)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(fetched_at);

    let count = |sel: &Selector| {
        card.select(sel)
            .next()
            .map(|e| parse_count(&e.text().collect::<String>()))
            .unwrap_or(0)
    };

    Some(RawPost {
        source_id,
        author_id,
        text,
        created_at,
        engagement: Engagement {
            likes: count(&SEL.like),
            reposts: count(&SEL.repost),
            replies: count(&SEL.reply),
        },
    })
}

/// `/handle/status/12345[/...]` → `(handle, "12345")`.
fn parse_status_href(href: &str) -> Option<(String, String)> {
    let path = href
        .split_once("://")
        .map(|(_, rest)| rest.find('/').map_or("", |i| &rest[i..]))
        .unwrap_or(href);
    let mut parts = path.trim_start_matches('/').split('/');
    let handle = parts.next()?.to_string();
    if parts.next()? != "status" {
        return None;
    }
    let id = parts.next()?.split(['?', '#']).next()?.to_string();
    if handle.is_empty() || id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((handle, id))
}

/// Display counts: `"1.2K"` → 1200, `"3M"` → 3 000 000, `"1,234"` → 1234, junk → 0.
pub fn parse_count(s: &str) -> u64 {
    let t: String = s.trim().chars().filter(|c| *c != ',').collect();
    if t.is_empty() {
        return 0;
    }
    let (num, mult) = match t.chars().last() {
        Some('K') | Some('k') => (&t[..t.len() - 1], 1_000f64),
        Some('M') | Some('m') => (&t[..t.len() - 1], 1_000_000f64),
        Some('B') | Some('b') => (&t[..t.len() - 1], 1_000_000_000f64),
        _ => (t.as_str(), 1f64),
    };
    num.trim()
        .parse::<f64>()
        .map(|n| (n * mult).round().max(0.0) as u64)
        .unwrap_or(0)
}

// ---------------- Browserless driver ----------------

/// Puppeteer function run remotely per request. The remote service is
/// stateless, so a "session" replays navigation with a growing scroll count
/// under the same fingerprint.
const BROWSERLESS_FN: &str = r#"export default async function ({ page, context }) {
  await page.setUserAgent(context.userAgent);
  await page.setViewport({ width: context.width, height: context.height });
  await page.setExtraHTTPHeaders({ 'Accept-Language': context.locale });
  if (context.suppressAutomation) {
    await page.evaluateOnNewDocument(() => {
      Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    });
  }
  await page.goto(context.url, { waitUntil: 'networkidle2' });
  for (let i = 0; i < context.scrolls; i++) {
    await page.evaluate(() => window.scrollTo(0, document.body.scrollHeight));
    await new Promise((r) => setTimeout(r, context.settleMs));
  }
  return { data: await page.content(), type: 'text/html' };
}"#;

pub struct BrowserlessDriver {
    client: reqwest::Client,
    base_url: String,
    token: Credentials,
}

impl BrowserlessDriver {
    pub fn new(cfg: &BrowserSection, token: Credentials) -> Result<Self, AcquireError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }
}

pub struct BrowserlessSession {
    client: reqwest::Client,
    endpoint: String,
    profile: FingerprintProfile,
    url: Option<String>,
    scrolls: u32,
    closed: bool,
}

impl BrowserlessSession {
    async fn render(&self) -> Result<String, AcquireError> {
        if self.closed {
            return Err(AcquireError::Transport("session closed".into()));
        }
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| AcquireError::Transport("no page opened".into()))?;
        let body = serde_json::json!({
            "code": BROWSERLESS_FN,
            "context": {
                "url": url,
                "userAgent": self.profile.user_agent,
                "width": self.profile.viewport.0,
                "height": self.profile.viewport.1,
                "locale": self.profile.locale,
                "suppressAutomation": self.profile.suppress_automation_flags,
                "scrolls": self.scrolls,
                "settleMs": 800,
            }
        });
        let resp = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message: String = resp.text().await.unwrap_or_default().chars().take(200).collect();
            return Err(AcquireError::Transport(format!(
                "browserless status {}: {message}",
                status.as_u16()
            )));
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl BrowserSession for BrowserlessSession {
    async fn open_search(&mut self, url: &str) -> Result<String, AcquireError> {
        self.url = Some(url.to_string());
        self.scrolls = 0;
        self.render().await
    }

    async fn scroll(&mut self) -> Result<String, AcquireError> {
        self.scrolls += 1;
        self.render().await
    }

    async fn close(&mut self) {
        self.closed = true;
        self.url = None;
    }
}

#[async_trait]
impl BrowserDriver for BrowserlessDriver {
    type Session = BrowserlessSession;

    async fn start_session(
        &self,
        profile: &FingerprintProfile,
    ) -> Result<BrowserlessSession, AcquireError> {
        let mut endpoint = format!("{}/function", self.base_url);
        if !self.token.is_empty() {
            endpoint.push_str(&format!("?token={}", self.token.expose()));
        }
        Ok(BrowserlessSession {
            client: self.client.clone(),
            endpoint,
            profile: profile.clone(),
            url: None,
            scrolls: 0,
            closed: false,
        })
    }
}
