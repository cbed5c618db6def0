// src/telemetry.rs
//! Tracing setup, metric descriptions and log-safe identifiers.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "complaint_miner=info,warn";

/// Install the global subscriber. `LOG_FORMAT=json` switches to JSON lines,
/// `RUST_LOG` overrides the default filter. Safe to call more than once.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    // Already initialized (tests, embedding apps) is fine.
    let _ = res;
}

/// One-time metrics registration (so series show up on the exporter).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "acquire_posts_total",
            "Raw posts returned by acquisition backends."
        );
        describe_counter!(
            "acquire_query_errors_total",
            "Queries that ended with a backend error (isolated, run continues)."
        );
        describe_counter!(
            "acquire_throttle_total",
            "Rate-limit throttle cycles entered by the API backend."
        );
        describe_counter!(
            "acquire_blocked_total",
            "Browser sessions that hit a detection signal."
        );
        describe_counter!(
            "acquire_filtered_total",
            "Posts dropped by normalization, repost or lookback filters."
        );
        describe_counter!(
            "acquire_dedup_total",
            "Posts dropped as duplicates by source id."
        );
        describe_counter!("classify_records_total", "Posts classified.");
        describe_counter!("store_upserts_total", "Records upserted into the store.");
        describe_histogram!("acquire_fetch_ms", "Backend fetch time in milliseconds.");
        describe_gauge!(
            "acquire_last_run_ts",
            "Unix ts when the acquisition coordinator last finished."
        );
    });
}

/// Short stable id for a piece of text, so logs never carry raw post content.
pub fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anon_hash_is_short_and_stable() {
        let a = anon_hash("系统经常崩溃");
        assert_eq!(a.len(), 12);
        assert_eq!(a, anon_hash("系统经常崩溃"));
        assert_ne!(a, anon_hash("something else"));
    }
}
