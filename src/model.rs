// src/model.rs
//! Post records: what backends return and what the store persists.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::language::Language;
use crate::lexicon::Category;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Engagement {
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
}

impl Engagement {
    /// Weighted engagement used to rank complaints: likes + 2×reposts + 1.5×replies.
    pub fn weighted(&self) -> f64 {
        self.likes as f64 + self.reposts as f64 * 2.0 + self.replies as f64 * 1.5
    }
}

/// Unclassified post as returned by a backend. Transient, never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawPost {
    /// Platform post id; identical across backends observing the same post.
    pub source_id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub engagement: Engagement,
}

/// A `RawPost` enriched by the classifier. `source_id` is the storage key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedRecord {
    #[serde(flatten)]
    pub post: RawPost,
    pub language: Language,
    pub difficulty_level: u8,
    pub category: Category,
    pub sentiment_score: f32,
    pub keywords: Vec<String>,
}

impl ClassifiedRecord {
    pub fn source_id(&self) -> &str {
        &self.post.source_id
    }

    pub fn date(&self) -> NaiveDate {
        self.post.created_at.date_naive()
    }

    pub fn is_complaint(&self) -> bool {
        self.sentiment_score < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn weighted_engagement() {
        let e = Engagement {
            likes: 10,
            reposts: 5,
            replies: 2,
        };
        assert_eq!(e.weighted(), 23.0);
    }

    #[test]
    fn record_serializes_flat() {
        let rec = ClassifiedRecord {
            post: RawPost {
                source_id: "1790000000000000001".into(),
                author_id: "42".into(),
                text: "app keeps crashing".into(),
                created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
                engagement: Engagement::default(),
            },
            language: Language::En,
            difficulty_level: 2,
            category: Category::Technical,
            sentiment_score: -1.0,
            keywords: vec!["crash".into()],
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["source_id"], "1790000000000000001");
        assert_eq!(v["category"], "technical");
        assert_eq!(v["language"], "en");
        let back: ClassifiedRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, rec);
    }
}
