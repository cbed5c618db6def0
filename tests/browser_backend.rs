// tests/browser_backend.rs
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use complaint_miner::acquire::browser::{
    BrowserBackend, BrowserDriver, BrowserSession, BrowserState, FingerprintProfile,
};
use complaint_miner::config::BrowserSection;
use complaint_miner::{AcquireError, Backend, FetchOutcome};

/// Rendered search page with one post card per id.
fn page(ids: &[u32]) -> String {
    let cards: String = ids
        .iter()
        .map(|i| {
            format!(
                r#"<article data-testid="tweet">
  <a href="/user{i}/status/{i}"><time datetime="2026-03-01T10:00:00.000Z">Mar 1</time></a>
  <div data-testid="tweetText">post {i}: app is slow again</div>
  <div data-testid="like"><span>{i}</span></div>
</article>"#
            )
        })
        .collect();
    format!("<html><body><main>{cards}</main></body></html>")
}

/// One card with the given text.
fn card(id: u32, text: &str) -> String {
    format!(
        r#"<article data-testid="tweet">
  <a href="/user{id}/status/{id}"><time datetime="2026-03-01T10:00:00.000Z">Mar 1</time></a>
  <div data-testid="tweetText">{text}</div>
</article>"#
    )
}

const BLOCK_PAGE: &str = "<html><body><h1>Unusual activity detected</h1></body></html>";
const EMPTY_PAGE: &str = "<html><body><main></main></body></html>";

#[derive(Default)]
struct Counters {
    started: AtomicUsize,
    closed: AtomicUsize,
    profiles: Mutex<Vec<FingerprintProfile>>,
}

/// Each started session plays the next script: first entry answers
/// `open_search`, the rest answer `scroll` (the last one repeats).
struct ScriptedDriver {
    scripts: Mutex<VecDeque<Vec<String>>>,
    counters: Arc<Counters>,
    cancel_on_open: Option<CancellationToken>,
}

impl ScriptedDriver {
    fn new(scripts: Vec<Vec<String>>) -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (
            Self {
                scripts: Mutex::new(scripts.into()),
                counters: counters.clone(),
                cancel_on_open: None,
            },
            counters,
        )
    }
}

struct ScriptedSession {
    pages: VecDeque<String>,
    last: String,
    counters: Arc<Counters>,
    cancel_on_open: Option<CancellationToken>,
}

impl ScriptedSession {
    fn next_page(&mut self) -> String {
        if let Some(p) = self.pages.pop_front() {
            self.last = p;
        }
        self.last.clone()
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn open_search(&mut self, _url: &str) -> Result<String, AcquireError> {
        if let Some(c) = &self.cancel_on_open {
            c.cancel();
        }
        Ok(self.next_page())
    }

    async fn scroll(&mut self) -> Result<String, AcquireError> {
        Ok(self.next_page())
    }

    async fn close(&mut self) {
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    type Session = ScriptedSession;

    async fn start_session(
        &self,
        profile: &FingerprintProfile,
    ) -> Result<ScriptedSession, AcquireError> {
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        self.counters.profiles.lock().unwrap().push(profile.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![EMPTY_PAGE.to_string()]);
        Ok(ScriptedSession {
            pages: script.into(),
            last: EMPTY_PAGE.to_string(),
            counters: self.counters.clone(),
            cancel_on_open: self.cancel_on_open.clone(),
        })
    }
}

fn fast_cfg() -> BrowserSection {
    BrowserSection {
        min_delay_ms: 1_000,
        max_delay_ms: 3_000,
        backoff_base_ms: 1_000,
        ..BrowserSection::default()
    }
}

fn ids(out: &FetchOutcome) -> Vec<String> {
    out.posts().iter().map(|p| p.source_id.clone()).collect()
}

#[tokio::test(start_paused = true)]
async fn scrolls_until_limit() {
    let (driver, counters) = ScriptedDriver::new(vec![vec![
        page(&[1, 2, 3]),
        page(&[1, 2, 3, 4, 5, 6]),
    ]]);
    let b = BrowserBackend::new(driver, fast_cfg());

    let out = b.fetch("q", 5, &CancellationToken::new()).await.unwrap();
    assert!(!out.is_partial());
    assert_eq!(ids(&out), vec!["1", "2", "3", "4", "5"]);
    assert_eq!(counters.started.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    assert_eq!(b.state(), BrowserState::Closed);
}

#[tokio::test(start_paused = true)]
async fn complaints_quoting_block_wording_are_kept() {
    let results = format!(
        "<html><body><main>{}{}</main></body></html>",
        card(1, "login keeps saying Access Denied"),
        card(2, "the captcha is unusable on mobile"),
    );
    let (driver, counters) = ScriptedDriver::new(vec![vec![results]]);
    let b = BrowserBackend::new(driver, fast_cfg());

    let out = b.fetch("q", 10, &CancellationToken::new()).await.unwrap();
    assert!(!out.is_partial(), "{out:?}");
    assert_eq!(ids(&out), vec!["1", "2"]);
    assert_eq!(counters.started.load(Ordering::SeqCst), 1);
    assert_eq!(b.state(), BrowserState::Closed);
}

#[tokio::test(start_paused = true)]
async fn stagnant_feed_counts_as_exhausted() {
    let (driver, counters) = ScriptedDriver::new(vec![vec![page(&[1, 2])]]);
    let b = BrowserBackend::new(driver, fast_cfg());

    let out = b.fetch("q", 50, &CancellationToken::new()).await.unwrap();
    assert!(!out.is_partial());
    assert_eq!(out.posts().len(), 2);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn degraded_session_is_reestablished() {
    let (driver, counters) = ScriptedDriver::new(vec![
        vec![page(&[1, 2]), BLOCK_PAGE.to_string()],
        vec![page(&[2, 3, 4])],
    ]);
    let b = BrowserBackend::new(driver, fast_cfg());

    let out = b.fetch("q", 4, &CancellationToken::new()).await.unwrap();
    assert!(!out.is_partial());
    assert_eq!(ids(&out), vec!["1", "2", "3", "4"]);
    assert_eq!(counters.started.load(Ordering::SeqCst), 2);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_blocked_with_partial_results() {
    let (driver, counters) = ScriptedDriver::new(vec![
        vec![page(&[7]), BLOCK_PAGE.to_string()],
        vec![EMPTY_PAGE.to_string()],
        vec![BLOCK_PAGE.to_string()],
    ]);
    let b = BrowserBackend::new(driver, fast_cfg());

    let out = b.fetch("q", 10, &CancellationToken::new()).await.unwrap();
    match &out {
        FetchOutcome::Partial { posts, cause } => {
            assert_eq!(posts.len(), 1);
            assert_eq!(posts[0].source_id, "7");
            assert!(matches!(
                cause,
                AcquireError::AcquisitionBlocked { attempts: 3, .. }
            ));
            assert_eq!(cause.reason(), "blocked");
        }
        other => panic!("expected partial, got {other:?}"),
    }
    // one initial session + two retries, every one released
    assert_eq!(counters.started.load(Ordering::SeqCst), 3);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 3);
    assert_eq!(b.state(), BrowserState::Degraded);
}

#[tokio::test(start_paused = true)]
async fn cancellation_releases_session() {
    let cancel = CancellationToken::new();
    let (mut driver, counters) = ScriptedDriver::new(vec![vec![page(&[1, 2])]]);
    driver.cancel_on_open = Some(cancel.clone());
    let b = BrowserBackend::new(driver, fast_cfg());

    let err = b.fetch("q", 10, &cancel).await.unwrap_err();
    assert_eq!(err, AcquireError::Cancelled);
    assert_eq!(counters.started.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_before_start_opens_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let (driver, counters) = ScriptedDriver::new(vec![]);
    let b = BrowserBackend::new(driver, fast_cfg());
    assert_eq!(
        b.fetch("q", 10, &cancel).await.unwrap_err(),
        AcquireError::Cancelled
    );
    assert_eq!(counters.started.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn one_fingerprint_per_session() {
    let (driver, counters) = ScriptedDriver::new(vec![
        vec![BLOCK_PAGE.to_string()],
        vec![page(&[1])],
    ]);
    let b = BrowserBackend::new(driver, fast_cfg());
    b.fetch("q", 1, &CancellationToken::new()).await.unwrap();
    // drawn once per session start, never mid-session
    assert_eq!(counters.profiles.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn pacing_makes_latency_grow_with_limit() {
    let (driver, _) = ScriptedDriver::new(vec![vec![
        page(&[1]),
        page(&[1, 2]),
        page(&[1, 2, 3]),
        page(&[1, 2, 3, 4]),
    ]]);
    let b = BrowserBackend::new(driver, fast_cfg());
    let t0 = tokio::time::Instant::now();
    b.fetch("q", 4, &CancellationToken::new()).await.unwrap();
    // three scroll passes, each paced by at least min_delay_ms
    assert!(t0.elapsed() >= std::time::Duration::from_millis(3_000));
}
