// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod acquire;
pub mod classify;
pub mod config;
pub mod error;
pub mod language;
pub mod lexicon;
pub mod model;
pub mod store;
pub mod telemetry;
pub mod views;

// ---- Re-exports for stable public API ----
pub use acquire::types::{Backend, BackendKind, FetchOutcome};
pub use acquire::{Coordinator, FilterPolicy, RunReport};
pub use classify::{Classification, Classifier};
pub use error::{AcquireError, ClassificationError, HarvestError, StorageError};
pub use language::{Language, LanguageDetector};
pub use lexicon::{Category, Lexicon};
pub use model::{ClassifiedRecord, Engagement, RawPost};
pub use store::{JsonlStore, MemoryStore, RecordCursor, RecordFilter, RecordStore};
