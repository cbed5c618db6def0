// src/acquire/mod.rs
pub mod api;
pub mod browser;
pub mod query;
pub mod types;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use std::collections::HashSet;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::classify::Classifier;
use crate::error::{AcquireError, HarvestError};
use crate::model::{ClassifiedRecord, RawPost};
use crate::store::RecordStore;
use crate::telemetry::ensure_metrics_described;
use types::{Backend, FetchOutcome};

/// Post text is capped at this many chars after normalization.
pub const MAX_POST_CHARS: usize = 2000;

/// Normalize post text: decode entities, strip tags, unify quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[a-z][^>]*>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > MAX_POST_CHARS {
        out = out.chars().take(MAX_POST_CHARS).collect();
    }
    out
}

/// Reposts carry someone else's text; the original is fetched on its own.
pub fn is_repost(text: &str) -> bool {
    text.starts_with("RT @")
}

pub fn is_reply(text: &str) -> bool {
    text.starts_with('@')
}

/// What the coordinator drops before classification.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    /// 0 disables the age filter.
    pub lookback_days: u32,
    pub skip_replies: bool,
}

/// Normalize + filter, then dedup by `source_id` (first occurrence wins).
/// Returns (kept, filtered_count, dedup_count).
pub fn normalize_filter_dedup(
    now: DateTime<Utc>,
    raw: Vec<RawPost>,
    policy: &FilterPolicy,
) -> (Vec<RawPost>, usize, usize) {
    let oldest = query::lookback_start(now, policy.lookback_days);

    let mut filtered_out = 0usize;
    let mut dedup_out = 0usize;
    let mut seen: HashSet<String> = HashSet::new();
    let mut keep = Vec::with_capacity(raw.len());

    for mut post in raw {
        post.text = normalize_text(&post.text);
        let too_old = oldest.is_some_and(|o| post.created_at < o);
        if post.text.is_empty()
            || post.source_id.is_empty()
            || is_repost(&post.text)
            || (policy.skip_replies && is_reply(&post.text))
            || too_old
        {
            filtered_out += 1;
            continue;
        }
        if !seen.insert(post.source_id.clone()) {
            dedup_out += 1;
            continue;
        }
        keep.push(post);
    }

    (keep, filtered_out, dedup_out)
}

/// A query that did not complete cleanly on one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFailure {
    pub query: String,
    pub backend: &'static str,
    pub error: AcquireError,
    /// Posts that still made it out of the failed fetch.
    pub salvaged: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub records: Vec<ClassifiedRecord>,
    pub fetched: usize,
    pub filtered: usize,
    pub duplicates: usize,
    pub failures: Vec<QueryFailure>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives backends across queries, merges, dedups and classifies.
/// Holds no backend-specific logic.
pub struct Coordinator {
    classifier: Classifier,
    policy: FilterPolicy,
}

impl Coordinator {
    pub fn new(classifier: Classifier) -> Self {
        Self {
            classifier,
            policy: FilterPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FilterPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Queries run in input order; within a query, backends run in slice order.
    /// Per-query failures are logged and recorded. A backend whose credentials
    /// are rejected is skipped for the remaining queries; only cancellation ends
    /// the run early.
    pub async fn run(
        &self,
        queries: &[String],
        per_query_limit: usize,
        backends: &[Box<dyn Backend>],
        cancel: &CancellationToken,
    ) -> Result<RunReport, HarvestError> {
        ensure_metrics_described();

        let mut raw: Vec<RawPost> = Vec::new();
        let mut failures = Vec::new();
        let mut disabled = vec![false; backends.len()];

        for query in queries {
            for (idx, backend) in backends.iter().enumerate() {
                if disabled[idx] {
                    continue;
                }
                if cancel.is_cancelled() {
                    return Err(AcquireError::Cancelled.into());
                }
                let t0 = Instant::now();
                let res = backend.fetch(query, per_query_limit, cancel).await;
                histogram!("acquire_fetch_ms").record(t0.elapsed().as_secs_f64() * 1000.0);

                match res {
                    Ok(FetchOutcome::Complete(mut posts)) => {
                        counter!("acquire_posts_total").increment(posts.len() as u64);
                        info!(target: "acquire", backend = backend.name(), query = %query, kept = posts.len(), "fetched");
                        raw.append(&mut posts);
                    }
                    Ok(FetchOutcome::Partial { mut posts, cause }) => {
                        counter!("acquire_posts_total").increment(posts.len() as u64);
                        counter!("acquire_query_errors_total").increment(1);
                        warn!(
                            target: "acquire",
                            backend = backend.name(),
                            query = %query,
                            reason = cause.reason(),
                            error = %cause,
                            kept = posts.len(),
                            "partial fetch"
                        );
                        disabled[idx] = cause.disables_backend();
                        failures.push(QueryFailure {
                            query: query.clone(),
                            backend: backend.name(),
                            error: cause,
                            salvaged: posts.len(),
                        });
                        raw.append(&mut posts);
                    }
                    Err(e) if e.is_fatal() => {
                        warn!(target: "acquire", backend = backend.name(), reason = e.reason(), error = %e, "run aborted");
                        return Err(e.into());
                    }
                    Err(e) => {
                        counter!("acquire_query_errors_total").increment(1);
                        warn!(target: "acquire", backend = backend.name(), query = %query, reason = e.reason(), error = %e, "query failed");
                        disabled[idx] = e.disables_backend();
                        failures.push(QueryFailure {
                            query: query.clone(),
                            backend: backend.name(),
                            error: e,
                            salvaged: 0,
                        });
                    }
                }
            }
        }

        let now = Utc::now();
        let fetched = raw.len();
        let (kept, filtered, duplicates) = normalize_filter_dedup(now, raw, &self.policy);
        counter!("acquire_filtered_total").increment(filtered as u64);
        counter!("acquire_dedup_total").increment(duplicates as u64);

        let mut records = Vec::with_capacity(kept.len());
        for post in kept {
            records.push(self.classifier.classify_post(post)?);
        }

        gauge!("acquire_last_run_ts").set(now.timestamp() as f64);
        info!(
            target: "acquire",
            queries = queries.len(),
            fetched,
            filtered,
            duplicates,
            records = records.len(),
            failures = failures.len(),
            "run finished"
        );

        Ok(RunReport {
            records,
            fetched,
            filtered,
            duplicates,
            failures,
        })
    }

    /// `run`, then upsert every record. Storage errors propagate unretried.
    pub async fn run_and_store(
        &self,
        queries: &[String],
        per_query_limit: usize,
        backends: &[Box<dyn Backend>],
        cancel: &CancellationToken,
        store: &dyn RecordStore,
    ) -> Result<RunReport, HarvestError> {
        let report = self.run(queries, per_query_limit, backends, cancel).await?;
        store.upsert_all(report.records.clone())?;
        Ok(report)
    }
}
