// src/error.rs
//! Error taxonomy for acquisition, classification and storage.

use thiserror::Error;

/// Failures raised by acquisition backends.
///
/// Everything except `Cancelled` is reported by `fetch` as the cause of a partial
/// result. `Authentication` is also returned by backend construction, where it
/// aborts the run before any query is issued.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AcquireError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limit still active after {cycles} throttle cycles")]
    RateLimitExceeded { cycles: u32 },

    #[error("acquisition blocked after {attempts} session attempts: {signal}")]
    AcquisitionBlocked { attempts: u32, signal: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("acquisition cancelled")]
    Cancelled,
}

impl AcquireError {
    /// Short machine-friendly reason used in logs and metric labels.
    pub fn reason(&self) -> &'static str {
        match self {
            AcquireError::Authentication(_) => "auth",
            AcquireError::RateLimitExceeded { .. } => "rate_limit",
            AcquireError::AcquisitionBlocked { .. } => "blocked",
            AcquireError::Transport(_) => "transport",
            AcquireError::Cancelled => "cancelled",
        }
    }

    /// Fatal errors stop the run instead of being isolated to one query.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AcquireError::Cancelled)
    }

    /// The backend cannot serve any further query in this run.
    pub fn disables_backend(&self) -> bool {
        matches!(self, AcquireError::Authentication(_))
    }
}

// `without_url` keeps query-string credentials out of messages that get logged.
impl From<reqwest::Error> for AcquireError {
    fn from(err: reqwest::Error) -> Self {
        AcquireError::Transport(err.without_url().to_string())
    }
}

/// Raised by the classifier on malformed input only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassificationError {
    #[error("malformed text: {0}")]
    Malformed(&'static str),

    #[error("text too long: {chars} chars (max {max})")]
    TooLong { chars: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Umbrella error for a coordinator run.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
