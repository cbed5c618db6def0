// src/lexicon.rs
//! Static keyword tables for category, difficulty and sentiment, keyed by language.
//!
//! TOML shape (see `lexicon.toml` in the repo root, embedded as the default):
//! ```toml
//! [category.technical]
//! en = ["bug", "crash"]
//! zh = ["崩溃"]
//!
//! [difficulty.5]
//! en = ["database"]
//!
//! [sentiment.positive]
//! en = ["great"]
//!
//! [negators]
//! en = ["not"]
//! ```
//!
//! The lexicon is immutable after construction; share it behind an `Arc`.

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::language::Language;

pub const ENV_LEXICON_PATH: &str = "LEXICON_PATH";

static BUILTIN: Lazy<Lexicon> = Lazy::new(|| {
    let raw = include_str!("../lexicon.toml");
    Lexicon::from_toml_str(raw).expect("valid embedded lexicon")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Technical,
    Usability,
    FeatureRequest,
    Performance,
    Compatibility,
    Service,
    Other,
}

impl Category {
    /// Tie-break order for category selection (first wins).
    pub const PRIORITY: [Category; 6] = [
        Category::Technical,
        Category::Performance,
        Category::Compatibility,
        Category::Usability,
        Category::FeatureRequest,
        Category::Service,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Technical => "technical",
            Category::Usability => "usability",
            Category::FeatureRequest => "feature_request",
            Category::Performance => "performance",
            Category::Compatibility => "compatibility",
            Category::Service => "service",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let c = match s.trim().to_ascii_lowercase().as_str() {
            "technical" => Category::Technical,
            "usability" => Category::Usability,
            "feature_request" => Category::FeatureRequest,
            "performance" => Category::Performance,
            "compatibility" => Category::Compatibility,
            "service" => Category::Service,
            "other" => Category::Other,
            other => bail!("unknown category `{other}`"),
        };
        Ok(c)
    }
}

/// Keyword list per language. Entries are trimmed, lowercased and deduplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LangTable {
    #[serde(default)]
    pub en: Vec<String>,
    #[serde(default)]
    pub zh: Vec<String>,
}

impl LangTable {
    pub fn for_language(&self, lang: Language) -> &[String] {
        match lang {
            Language::En => &self.en,
            Language::Zh => &self.zh,
        }
    }

    fn cleaned(self) -> Self {
        Self {
            en: clean_list(self.en),
            zh: clean_list(self.zh),
        }
    }

    fn is_empty(&self) -> bool {
        self.en.is_empty() && self.zh.is_empty()
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        let t = it.trim().to_lowercase();
        if !t.is_empty() && seen.insert(t.clone()) {
            out.push(t);
        }
    }
    out
}

#[derive(Debug, Deserialize)]
struct LexiconFile {
    #[serde(default)]
    category: BTreeMap<String, LangTable>,
    #[serde(default)]
    difficulty: BTreeMap<String, LangTable>,
    #[serde(default)]
    sentiment: SentimentFile,
    #[serde(default)]
    negators: LangTable,
}

#[derive(Debug, Default, Deserialize)]
struct SentimentFile {
    #[serde(default)]
    positive: LangTable,
    #[serde(default)]
    negative: LangTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexicon {
    /// In `Category::PRIORITY` order; `Other` never has keywords.
    categories: Vec<(Category, LangTable)>,
    /// Index 0 = level 1 .. index 4 = level 5.
    difficulty: [LangTable; 5],
    positive: LangTable,
    negative: LangTable,
    negators: LangTable,
}

impl Lexicon {
    /// The embedded default lexicon.
    pub fn builtin() -> &'static Lexicon {
        &BUILTIN
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: LexiconFile = toml::from_str(s).context("parsing lexicon toml")?;

        let mut by_cat: BTreeMap<Category, LangTable> = BTreeMap::new();
        for (name, table) in file.category {
            let cat: Category = name.parse()?;
            if cat == Category::Other {
                bail!("category `other` is the fallback and cannot have keywords");
            }
            by_cat.insert(cat, table.cleaned());
        }
        let categories = Category::PRIORITY
            .iter()
            .map(|c| (*c, by_cat.remove(c).unwrap_or_default()))
            .collect();

        let mut difficulty: [LangTable; 5] = Default::default();
        for (key, table) in file.difficulty {
            let level: u8 = key
                .trim()
                .parse()
                .map_err(|_| anyhow!("difficulty key `{key}` is not a number"))?;
            if !(1..=5).contains(&level) {
                bail!("difficulty level {level} out of range 1..=5");
            }
            difficulty[usize::from(level - 1)] = table.cleaned();
        }

        Ok(Self {
            categories,
            difficulty,
            positive: file.sentiment.positive.cleaned(),
            negative: file.sentiment.negative.cleaned(),
            negators: file.negators.cleaned(),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading lexicon from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Resolve the lexicon once at startup:
    /// 1) explicit path (from config)
    /// 2) $LEXICON_PATH
    /// 3) embedded default
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::from_path(p);
        }
        if let Ok(p) = std::env::var(ENV_LEXICON_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_LEXICON_PATH} points to non-existent path");
            }
            return Self::from_path(&pb);
        }
        Ok(Self::builtin().clone())
    }

    pub fn categories(&self) -> impl Iterator<Item = (Category, &LangTable)> {
        self.categories.iter().map(|(c, t)| (*c, t))
    }

    /// Keywords for a difficulty level (1..=5). Out-of-range levels yield an empty table.
    pub fn difficulty(&self, level: u8) -> &LangTable {
        static EMPTY: Lazy<LangTable> = Lazy::new(LangTable::default);
        match level {
            1..=5 => &self.difficulty[usize::from(level - 1)],
            _ => &EMPTY,
        }
    }

    pub fn positive(&self) -> &LangTable {
        &self.positive
    }

    pub fn negative(&self) -> &LangTable {
        &self.negative
    }

    pub fn negators(&self) -> &LangTable {
        &self.negators
    }

    /// True when no category, difficulty or sentiment keyword is configured.
    pub fn is_empty(&self) -> bool {
        self.categories.iter().all(|(_, t)| t.is_empty())
            && self.difficulty.iter().all(LangTable::is_empty)
            && self.positive.is_empty()
            && self.negative.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_is_complete() {
        let lx = Lexicon::builtin();
        assert!(!lx.is_empty());
        for (cat, table) in lx.categories() {
            assert!(!table.en.is_empty(), "{cat} has no en keywords");
            assert!(!table.zh.is_empty(), "{cat} has no zh keywords");
        }
        for level in 1..=5 {
            assert!(!lx.difficulty(level).en.is_empty());
        }
        assert!(lx.difficulty(0).en.is_empty());
        assert!(lx.difficulty(6).zh.is_empty());
    }

    #[test]
    fn categories_follow_priority_order() {
        let order: Vec<Category> = Lexicon::builtin().categories().map(|(c, _)| c).collect();
        assert_eq!(order, Category::PRIORITY.to_vec());
    }

    #[test]
    fn entries_are_cleaned() {
        let lx = Lexicon::from_toml_str(
            r#"
[category.technical]
en = [" Crash ", "", "crash", "BUG"]

[difficulty.3]
zh = ["功能"]
"#,
        )
        .unwrap();
        let (_, t) = lx.categories().next().unwrap();
        assert_eq!(t.en, vec!["crash".to_string(), "bug".to_string()]);
        assert_eq!(lx.difficulty(3).zh, vec!["功能".to_string()]);
        assert!(lx.positive().en.is_empty());
    }

    #[test]
    fn rejects_bad_tables() {
        assert!(Lexicon::from_toml_str("[difficulty.7]\nen = [\"x\"]").is_err());
        assert!(Lexicon::from_toml_str("[difficulty.hard]\nen = [\"x\"]").is_err());
        assert!(Lexicon::from_toml_str("[category.other]\nen = [\"x\"]").is_err());
        assert!(Lexicon::from_toml_str("[category.pricing]\nen = [\"x\"]").is_err());
    }

    #[test]
    fn category_roundtrips_through_str() {
        for c in Category::PRIORITY.iter().chain([Category::Other].iter()) {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), *c);
        }
    }
}
