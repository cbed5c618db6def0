//! complaint-miner: one-shot harvest run.
//! Config → backends → coordinator → store → views → summary on stdout.
//!
//! Keywords come from `[acquire] keywords`, or from the command line when given
//! (`complaint-miner WeChat Alipay`).

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use complaint_miner::acquire::api::{ApiBackend, HttpSearchApi};
use complaint_miner::acquire::browser::{BrowserBackend, BrowserlessDriver};
use complaint_miner::acquire::query::build_queries;
use complaint_miner::config::{self, HarvestConfig};
use complaint_miner::telemetry::{ensure_metrics_described, init_tracing};
use complaint_miner::views::{self, Summary};
use complaint_miner::{
    Backend, Classifier, Coordinator, FilterPolicy, JsonlStore, LanguageDetector, Lexicon,
};

fn install_metrics_exporter() -> Result<()> {
    let Ok(addr) = std::env::var("METRICS_ADDR") else {
        return Ok(());
    };
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("METRICS_ADDR `{addr}` is not a socket address"))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing prometheus exporter")?;
    ensure_metrics_described();
    info!(%addr, "metrics exporter listening");
    Ok(())
}

/// Construct the configured backends. Authentication failures abort here.
async fn build_backends(cfg: &HarvestConfig) -> Result<Vec<Box<dyn Backend>>> {
    let mut backends: Vec<Box<dyn Backend>> = Vec::new();
    let kind = cfg.acquire.backend;

    if kind.uses_api() {
        let http = HttpSearchApi::new(&cfg.api, cfg.api_credentials())?;
        let api = ApiBackend::connect(http, cfg.api.clone())
            .await
            .context("structured API backend")?
            .with_lookback_days(cfg.acquire.lookback_days);
        backends.push(Box::new(api));
    }
    if kind.uses_browser() {
        let driver = BrowserlessDriver::new(&cfg.browser, cfg.browser_credentials())?;
        let browser = BrowserBackend::new(driver, cfg.browser.clone())
            .with_lookback_days(cfg.acquire.lookback_days);
        backends.push(Box::new(browser));
    }
    Ok(backends)
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real env vars win.
    let _ = dotenvy::dotenv();
    init_tracing();
    install_metrics_exporter()?;

    let mut cfg = config::load_default()?;
    let cli_keywords: Vec<String> = std::env::args().skip(1).collect();
    if !cli_keywords.is_empty() {
        cfg.acquire.keywords = cli_keywords;
    }

    let queries = build_queries(
        &cfg.acquire.keywords,
        &cfg.acquire.complaint_terms,
        cfg.acquire.expand_queries,
    );
    if queries.is_empty() {
        warn!("no keywords configured; nothing to do");
        return Ok(());
    }

    let lexicon = Lexicon::load(cfg.classifier.lexicon_path.as_deref())?;
    let classifier = Classifier::new(Arc::new(lexicon))
        .with_detector(LanguageDetector::new(cfg.classifier.cjk_threshold))
        .with_top_n(cfg.classifier.top_n);

    let backends = build_backends(&cfg).await?;
    info!(
        backend = %cfg.acquire.backend,
        queries = queries.len(),
        per_query_limit = cfg.acquire.per_query_limit,
        "starting harvest"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; cancelling");
                cancel.cancel();
            }
        });
    }

    let store = JsonlStore::open(&cfg.store.path)?;
    let coordinator = Coordinator::new(classifier).with_policy(FilterPolicy {
        lookback_days: cfg.acquire.lookback_days,
        skip_replies: cfg.acquire.skip_replies,
    });

    let report = coordinator
        .run_and_store(
            &queries,
            cfg.acquire.per_query_limit,
            &backends,
            &cancel,
            &store,
        )
        .await?;
    for f in &report.failures {
        warn!(query = %f.query, backend = f.backend, reason = f.error.reason(), salvaged = f.salvaged, "query incomplete");
    }

    views::materialize(&store, &cfg.store.views_dir)?;
    let summary = Summary::from_store(&store, cfg.store.top_complaints)?;
    info!(
        new_records = report.records.len(),
        stored = summary.total,
        complaints = summary.complaints,
        "harvest finished"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
