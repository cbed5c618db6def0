// tests/api_throttle.rs
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use complaint_miner::acquire::api::{
    ApiBackend, ApiError, ApiState, SearchApi, SearchPage, SearchRequest,
};
use complaint_miner::config::ApiSection;
use complaint_miner::{AcquireError, Backend, Engagement, FetchOutcome, RawPost};

/// Plays back a fixed script of page responses and records the cursor of every call.
struct ScriptedApi {
    verify: Result<(), ApiError>,
    script: Mutex<VecDeque<Result<SearchPage, ApiError>>>,
    cursors: Mutex<Vec<Option<String>>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedApi {
    fn new(script: Vec<Result<SearchPage, ApiError>>) -> Self {
        Self {
            verify: Ok(()),
            script: Mutex::new(script.into()),
            cursors: Mutex::new(vec![]),
            queries: Mutex::new(vec![]),
        }
    }
}

#[async_trait]
impl SearchApi for ScriptedApi {
    async fn verify(&self) -> Result<(), ApiError> {
        self.verify.clone()
    }

    async fn search_page(&self, req: &SearchRequest<'_>) -> Result<SearchPage, ApiError> {
        self.cursors
            .lock()
            .unwrap()
            .push(req.cursor.map(str::to_string));
        self.queries.lock().unwrap().push(req.query.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(SearchPage::default()))
    }
}

/// Lets a test keep a handle on the script after the backend takes ownership.
struct Shared(Arc<ScriptedApi>);

#[async_trait]
impl SearchApi for Shared {
    async fn verify(&self) -> Result<(), ApiError> {
        self.0.verify().await
    }

    async fn search_page(&self, req: &SearchRequest<'_>) -> Result<SearchPage, ApiError> {
        self.0.search_page(req).await
    }
}

fn posts(ids: &[u32]) -> Vec<RawPost> {
    ids.iter()
        .map(|i| RawPost {
            source_id: format!("{i}"),
            author_id: "author".into(),
            text: format!("post {i} keeps crashing"),
            created_at: Utc::now(),
            engagement: Engagement::default(),
        })
        .collect()
}

fn page(ids: &[u32], next: Option<&str>) -> Result<SearchPage, ApiError> {
    Ok(SearchPage {
        posts: posts(ids),
        next_cursor: next.map(str::to_string),
    })
}

fn throttled() -> Result<SearchPage, ApiError> {
    Err(ApiError::RateLimited { reset_at: None })
}

async fn backend(api: ScriptedApi) -> ApiBackend<ScriptedApi> {
    ApiBackend::connect(api, ApiSection::default()).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn throttle_exhaustion_returns_collected_items() {
    let api = ScriptedApi::new(vec![
        page(&[1, 2, 3], Some("c1")),
        throttled(),
        throttled(),
        throttled(),
        throttled(),
    ]);
    let b = backend(api).await;

    let out = b
        .fetch("\"WeChat\"", 10, &CancellationToken::new())
        .await
        .unwrap();

    match out {
        FetchOutcome::Partial { posts, cause } => {
            assert_eq!(posts.len(), 3);
            assert_eq!(cause, AcquireError::RateLimitExceeded { cycles: 3 });
        }
        other => panic!("expected partial, got {other:?}"),
    }
    assert_eq!(b.state(), ApiState::Idle);
    assert_eq!(b.throttle_cycles_total(), 3);
}

#[tokio::test(start_paused = true)]
async fn paging_resumes_from_last_cursor_after_throttle() {
    let api = ScriptedApi::new(vec![
        page(&[1, 2], Some("c1")),
        throttled(),
        page(&[3, 4], None),
    ]);
    let b = backend(api).await;

    let out = b.fetch("q", 10, &CancellationToken::new()).await.unwrap();
    assert!(!out.is_partial());
    let ids: Vec<&str> = out.posts().iter().map(|p| p.source_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4"]);

    assert_eq!(b.throttle_cycles_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn cursor_is_not_reset_by_throttle() {
    let api = Arc::new(ScriptedApi::new(vec![
        page(&[1], Some("c1")),
        throttled(),
        page(&[2], Some("c2")),
        throttled(),
        page(&[3], None),
    ]));
    let b = ApiBackend::connect(Shared(api.clone()), ApiSection::default())
        .await
        .unwrap();
    let out = b.fetch("q", 10, &CancellationToken::new()).await.unwrap();
    assert_eq!(out.posts().len(), 3);

    // no already-fetched page is requested twice
    let cursors = api.cursors.lock().unwrap().clone();
    assert_eq!(
        cursors,
        vec![
            None,
            Some("c1".to_string()),
            Some("c1".to_string()),
            Some("c2".to_string()),
            Some("c2".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn limit_caps_results_and_dedups_within_call() {
    let api = ScriptedApi::new(vec![
        page(&[1, 2, 2, 3], Some("c1")),
        page(&[3, 4, 5, 6], Some("c2")),
    ]);
    let b = backend(api).await;
    let out = b.fetch("q", 5, &CancellationToken::new()).await.unwrap();
    let ids: Vec<&str> = out.posts().iter().map(|p| p.source_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn bad_credentials_fail_fast() {
    let mut api = ScriptedApi::new(vec![]);
    api.verify = Err(ApiError::Unauthorized("status 401".into()));
    let err = ApiBackend::connect(api, ApiSection::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, AcquireError::Authentication(_)));
    assert!(err.disables_backend());
}

#[tokio::test]
async fn rate_limited_probe_still_connects() {
    let mut api = ScriptedApi::new(vec![]);
    api.verify = Err(ApiError::RateLimited { reset_at: None });
    let b = ApiBackend::connect(api, ApiSection::default()).await.unwrap();
    assert_eq!(b.state(), ApiState::Authenticated);
}

#[tokio::test]
async fn transport_failure_mid_fetch_is_partial() {
    let api = ScriptedApi::new(vec![
        page(&[1, 2], Some("c1")),
        Err(ApiError::Transport("connection reset".into())),
    ]);
    let b = backend(api).await;
    let out = b.fetch("q", 10, &CancellationToken::new()).await.unwrap();
    assert_eq!(out.posts().len(), 2);
    assert_eq!(out.cause().map(|c| c.reason()), Some("transport"));
}

#[tokio::test]
async fn revoked_token_mid_fetch_keeps_collected_posts() {
    let api = ScriptedApi::new(vec![
        page(&[1, 2], Some("c1")),
        Err(ApiError::Unauthorized("status 401".into())),
    ]);
    let b = backend(api).await;
    let out = b.fetch("q", 10, &CancellationToken::new()).await.unwrap();
    assert_eq!(out.posts().len(), 2);
    assert!(matches!(out.cause(), Some(AcquireError::Authentication(_))));
    assert_eq!(b.state(), ApiState::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_throttle_wait() {
    let api = ScriptedApi::new(vec![page(&[1], Some("c1")), throttled()]);
    let b = backend(api).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        trigger.cancel();
    });
    let err = b.fetch("q", 10, &cancel).await.unwrap_err();
    assert_eq!(err, AcquireError::Cancelled);
    assert_eq!(b.state(), ApiState::Idle);
}

#[tokio::test]
async fn query_gets_repost_exclusion() {
    let api = Arc::new(ScriptedApi::new(vec![page(&[1], None)]));
    let b = ApiBackend::connect(Shared(api.clone()), ApiSection::default())
        .await
        .unwrap();
    b.fetch("\"Alipay\" (bug)", 10, &CancellationToken::new())
        .await
        .unwrap();
    let queries = api.queries.lock().unwrap().clone();
    assert_eq!(queries, vec!["\"Alipay\" (bug) -is:retweet".to_string()]);
}
