// src/language.rs
//! Script-based language detection (zh vs en). No external models, no network.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_CJK_THRESHOLD: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Zh,
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
        }
    }
}

impl Default for Language {
    fn default() -> Self {
        Language::En
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LanguageDetector {
    cjk_threshold: f32,
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CJK_THRESHOLD)
    }
}

impl LanguageDetector {
    /// Threshold is clamped to [0.0, 1.0]; non-finite values fall back to the default.
    pub fn new(cjk_threshold: f32) -> Self {
        let cjk_threshold = if cjk_threshold.is_finite() {
            cjk_threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_CJK_THRESHOLD
        };
        Self { cjk_threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.cjk_threshold
    }

    /// `Zh` when the share of CJK code points among non-whitespace chars exceeds
    /// the threshold, otherwise `En`. Empty or whitespace-only text is `En`.
    pub fn detect(&self, text: &str) -> Language {
        let mut total = 0usize;
        let mut cjk = 0usize;
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            total += 1;
            if is_cjk(c) {
                cjk += 1;
            }
        }
        if total == 0 {
            return Language::default();
        }
        if cjk as f32 / total as f32 > self.cjk_threshold {
            Language::Zh
        } else {
            Language::En
        }
    }
}

/// Shorthand for detection with the default threshold.
pub fn detect(text: &str) -> Language {
    LanguageDetector::default().detect(text)
}

fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x4E00..=0x9FFF      // CJK Unified Ideographs
            | 0x3400..=0x4DBF  // Extension A
            | 0x20000..=0x2A6DF // Extension B
            | 0xF900..=0xFAFF  // Compatibility Ideographs
    )
}
