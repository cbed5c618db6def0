// src/acquire/types.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use crate::error::AcquireError;
use crate::model::RawPost;

/// Result of one `fetch` call. A partial fetch carries the posts collected
/// before the backend gave up, plus the reason it gave up.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Complete(Vec<RawPost>),
    Partial {
        posts: Vec<RawPost>,
        cause: AcquireError,
    },
}

impl FetchOutcome {
    pub fn posts(&self) -> &[RawPost] {
        match self {
            FetchOutcome::Complete(p) => p,
            FetchOutcome::Partial { posts, .. } => posts,
        }
    }

    pub fn cause(&self) -> Option<&AcquireError> {
        match self {
            FetchOutcome::Complete(_) => None,
            FetchOutcome::Partial { cause, .. } => Some(cause),
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, FetchOutcome::Partial { .. })
    }

    pub fn into_parts(self) -> (Vec<RawPost>, Option<AcquireError>) {
        match self {
            FetchOutcome::Complete(p) => (p, None),
            FetchOutcome::Partial { posts, cause } => (posts, Some(cause)),
        }
    }
}

/// A search capability with its own throttling/failure profile.
///
/// `fetch` returns at most `limit` posts with unique `source_id`s. Failures,
/// including credentials revoked mid-run, come back as `FetchOutcome::Partial`
/// with whatever was collected; `Err` is reserved for cancellation.
/// Cancellation is observed between pages / extraction passes.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    async fn fetch(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, AcquireError>;

    fn name(&self) -> &'static str;
}

/// Backend selection flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Api,
    Browser,
    Both,
}

impl BackendKind {
    pub fn uses_api(self) -> bool {
        matches!(self, BackendKind::Api | BackendKind::Both)
    }

    pub fn uses_browser(self) -> bool {
        matches!(self, BackendKind::Browser | BackendKind::Both)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Api => "api",
            BackendKind::Browser => "browser",
            BackendKind::Both => "both",
        })
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" => Ok(BackendKind::Api),
            "browser" | "selenium" => Ok(BackendKind::Browser),
            "both" => Ok(BackendKind::Both),
            other => Err(anyhow::anyhow!("unknown backend `{other}`")),
        }
    }
}
