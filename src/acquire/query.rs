// src/acquire/query.rs
//! Search query construction: complaint-term expansion and lookback helpers.

use chrono::{DateTime, Duration, Utc};

/// Default complaint vocabulary, bilingual.
pub const DEFAULT_COMPLAINT_TERMS: [&str; 10] = [
    "problem", "issue", "bug", "error", "crash", "slow", "broken", "问题", "崩溃", "失败",
];

/// Repost exclusion operators per query dialect.
pub const API_EXCLUDE_REPOSTS: &str = "-is:retweet";
pub const BROWSER_EXCLUDE_REPOSTS: &str = "-filter:retweets";

/// `"<keyword>" (t1 OR t2 OR …)`. Quotes inside the keyword are dropped so the
/// phrase stays a single term. No terms → just the quoted phrase.
pub fn expand(keyword: &str, terms: &[String]) -> String {
    let kw: String = keyword.trim().chars().filter(|c| *c != '"').collect();
    let terms: Vec<&str> = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        format!("\"{kw}\"")
    } else {
        format!("\"{kw}\" ({})", terms.join(" OR "))
    }
}

/// Keyword list → queries, in input order. Blank and repeated keywords are skipped.
pub fn build_queries(keywords: &[String], terms: &[String], expand_terms: bool) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty() && seen.insert(k.to_lowercase()))
        .map(|k| {
            if expand_terms {
                expand(k, terms)
            } else {
                k.to_string()
            }
        })
        .collect()
}

/// Append an operator unless the query already carries it.
pub fn with_operator(query: &str, op: &str) -> String {
    let q = query.trim();
    if op.is_empty() || q.split_whitespace().any(|t| t == op) {
        q.to_string()
    } else if q.is_empty() {
        op.to_string()
    } else {
        format!("{q} {op}")
    }
}

/// Start of the lookback window; `days == 0` disables it.
pub fn lookback_start(now: DateTime<Utc>, days: u32) -> Option<DateTime<Utc>> {
    (days > 0).then(|| now - Duration::days(i64::from(days)))
}

/// Web-search `since:` operator for a window start.
pub fn since_operator(start: DateTime<Utc>) -> String {
    format!("since:{}", start.format("%Y-%m-%d"))
}
