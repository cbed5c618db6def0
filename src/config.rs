// src/config.rs
//! Harvest configuration: `[acquire]`, `[api]`, `[browser]`, `[classifier]`, `[store]`.
//!
//! Every field has a default, so an empty file (or no file) is a valid config.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::acquire::query::DEFAULT_COMPLAINT_TERMS;
use crate::acquire::types::BackendKind;
use crate::language::DEFAULT_CJK_THRESHOLD;

pub const ENV_CONFIG_PATH: &str = "HARVEST_CONFIG_PATH";
pub const ENV_BEARER_TOKEN: &str = "TWITTER_BEARER_TOKEN";
pub const ENV_BROWSERLESS_TOKEN: &str = "BROWSERLESS_TOKEN";

/// Config value meaning "take it from the environment".
const FROM_ENV: &str = "ENV";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub acquire: AcquireSection,
    pub api: ApiSection,
    pub browser: BrowserSection,
    pub classifier: ClassifierSection,
    pub store: StoreSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquireSection {
    pub keywords: Vec<String>,
    pub per_query_limit: usize,
    /// 0 disables the lookback filter.
    pub lookback_days: u32,
    pub backend: BackendKind,
    pub expand_queries: bool,
    pub complaint_terms: Vec<String>,
    pub skip_replies: bool,
}

impl Default for AcquireSection {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            per_query_limit: 100,
            lookback_days: 7,
            backend: BackendKind::Api,
            expand_queries: true,
            complaint_terms: DEFAULT_COMPLAINT_TERMS.iter().map(|s| s.to_string()).collect(),
            skip_replies: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    /// Literal token or `"ENV"` for `$TWITTER_BEARER_TOKEN`.
    pub bearer_token: String,
    /// Upstream accepts 10..=100 per page.
    pub page_size: usize,
    pub max_throttle_cycles: u32,
    /// Upper bound on a single throttle sleep, whatever the reset header says.
    pub max_throttle_wait_secs: u64,
    /// Used when a 429 carries no reset time.
    pub fallback_wait_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "https://api.twitter.com".into(),
            bearer_token: FROM_ENV.into(),
            page_size: 100,
            max_throttle_cycles: 3,
            max_throttle_wait_secs: 900,
            fallback_wait_secs: 60,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    /// Browserless-compatible endpoint (`/function` is appended).
    pub endpoint: String,
    /// Literal token, `"ENV"` for `$BROWSERLESS_TOKEN`, or empty for none.
    pub token: String,
    pub search_url: String,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Scroll/extract passes per session.
    pub max_passes: u32,
    pub session_retries: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000".into(),
            token: FROM_ENV.into(),
            search_url: "https://x.com/search".into(),
            min_delay_ms: 1_000,
            max_delay_ms: 3_000,
            max_passes: 10,
            session_retries: 2,
            backoff_base_ms: 1_000,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    pub lexicon_path: Option<PathBuf>,
    pub cjk_threshold: f32,
    pub top_n: usize,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            lexicon_path: None,
            cjk_threshold: DEFAULT_CJK_THRESHOLD,
            top_n: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub path: PathBuf,
    pub views_dir: PathBuf,
    pub top_complaints: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/records.jsonl"),
            views_dir: PathBuf::from("data/views"),
            top_complaints: 10,
        }
    }
}

/// Opaque credential handed to a backend. Never printed.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into().trim().to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_empty()
    }

    pub(crate) fn expose(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.token.is_empty() { "<empty>" } else { "<redacted>" };
        f.debug_struct("Credentials").field("token", &shown).finish()
    }
}

/// `"ENV"` (any case) reads `env_key`, anything else is the literal value.
fn resolve_secret(value: &str, env_key: &str) -> Credentials {
    if value.trim().eq_ignore_ascii_case(FROM_ENV) {
        Credentials::new(std::env::var(env_key).unwrap_or_default())
    } else {
        Credentials::new(value)
    }
}

impl HarvestConfig {
    pub fn api_credentials(&self) -> Credentials {
        resolve_secret(&self.api.bearer_token, ENV_BEARER_TOKEN)
    }

    pub fn browser_credentials(&self) -> Credentials {
        resolve_secret(&self.browser.token, ENV_BROWSERLESS_TOKEN)
    }

    /// Sanity checks that serde alone cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.acquire.per_query_limit == 0 {
            return Err(anyhow!("acquire.per_query_limit must be > 0"));
        }
        if self.api.page_size == 0 {
            return Err(anyhow!("api.page_size must be > 0"));
        }
        if self.browser.min_delay_ms > self.browser.max_delay_ms {
            return Err(anyhow!(
                "browser.min_delay_ms ({}) > browser.max_delay_ms ({})",
                self.browser.min_delay_ms,
                self.browser.max_delay_ms
            ));
        }
        if self.classifier.top_n == 0 {
            return Err(anyhow!("classifier.top_n must be > 0"));
        }
        Ok(())
    }
}

/// Load config from an explicit path. TOML or JSON, picked by extension then by content.
pub fn load_from(path: &Path) -> Result<HarvestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg = parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config using env var + fallbacks:
/// 1) $HARVEST_CONFIG_PATH
/// 2) config/harvest.toml
/// 3) config/harvest.json
/// 4) defaults
pub fn load_default() -> Result<HarvestConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_from(&pb);
        } else {
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/harvest.toml");
    if toml_p.exists() {
        return load_from(&toml_p);
    }
    let json_p = PathBuf::from("config/harvest.json");
    if json_p.exists() {
        return load_from(&json_p);
    }
    Ok(HarvestConfig::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<HarvestConfig> {
    if hint_ext == "json" || (hint_ext != "toml" && s.trim_start().starts_with('{')) {
        return serde_json::from_str(s).context("invalid JSON config");
    }
    toml::from_str(s).context("invalid TOML config")
}
