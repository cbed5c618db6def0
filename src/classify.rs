// src/classify.rs
//! Rule/lexicon classifier: text + language → difficulty, category, sentiment, keywords.
//!
//! Pure and deterministic. English keywords match whole tokens (allowing a few
//! inflection suffixes), Chinese keywords match as substrings. Sentiment hits
//! preceded by a negator flip polarity.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tracing::debug;

use crate::error::ClassificationError;
use crate::language::{Language, LanguageDetector};
use crate::lexicon::{Category, Lexicon};
use crate::model::{ClassifiedRecord, RawPost};
use crate::telemetry::anon_hash;

pub const DEFAULT_TOP_N: usize = 10;
/// Used when no difficulty keyword matches: no signal is not the same as trivial.
pub const DEFAULT_DIFFICULTY: u8 = 2;
pub const MAX_TEXT_CHARS: usize = 10_000;

/// Inflections accepted after an English keyword ("crash" → "crashes", "crashing").
const EN_SUFFIXES: &[&str] = &["s", "es", "ed", "d", "ing", "er", "ers", "ly"];
/// English negators look back this many tokens.
const EN_NEGATION_WINDOW: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub difficulty_level: u8,
    pub category: Category,
    pub sentiment_score: f32,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    lexicon: Arc<Lexicon>,
    detector: LanguageDetector,
    top_n: usize,
}

impl Classifier {
    pub fn new(lexicon: Arc<Lexicon>) -> Self {
        Self {
            lexicon,
            detector: LanguageDetector::default(),
            top_n: DEFAULT_TOP_N,
        }
    }

    /// Classifier over the embedded default lexicon.
    pub fn with_builtin_lexicon() -> Self {
        Self::new(Arc::new(Lexicon::builtin().clone()))
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_detector(mut self, detector: LanguageDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn detector(&self) -> &LanguageDetector {
        &self.detector
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn classify(
        &self,
        text: &str,
        language: Language,
    ) -> Result<Classification, ClassificationError> {
        validate(text)?;

        let ctx = TextCtx::new(text, language, self.lexicon.negators().for_language(language));
        let mut matched: HashMap<String, Vec<Occurrence>> = HashMap::new();

        // Category: most hits wins; ties keep the earlier (higher priority) category.
        let mut best: Option<(Category, usize)> = None;
        for (cat, table) in self.lexicon.categories() {
            let mut hits = 0usize;
            for (kw, occ) in ctx.find_all(table.for_language(language)) {
                hits += occ.len();
                note(&mut matched, kw, &occ);
            }
            if hits > 0 && best.map_or(true, |(_, b)| hits > b) {
                best = Some((cat, hits));
            }
        }
        let category = best.map(|(c, _)| c).unwrap_or(Category::Other);

        // Difficulty: scan 5 → 1, first level with a hit is the answer.
        let mut difficulty: Option<u8> = None;
        for level in (1..=5u8).rev() {
            for (kw, occ) in ctx.find_all(self.lexicon.difficulty(level).for_language(language)) {
                if !occ.is_empty() {
                    difficulty.get_or_insert(level);
                }
                note(&mut matched, kw, &occ);
            }
        }
        let difficulty_level = difficulty.unwrap_or(DEFAULT_DIFFICULTY);

        // Both polarities in one pass so a hit nested in a longer one of
        // either polarity is not counted twice.
        let (mut pos, mut neg) = (0usize, 0usize);
        let positive = self.lexicon.positive().for_language(language);
        let negative = self.lexicon.negative().for_language(language);
        for (i, (kw, occ)) in ctx
            .find_all(positive.iter().chain(negative))
            .into_iter()
            .enumerate()
        {
            let favourable = i < positive.len();
            for o in &occ {
                if favourable != o.negated {
                    pos += 1;
                } else {
                    neg += 1;
                }
            }
            note(&mut matched, kw, &occ);
        }
        let sentiment_score = sentiment_score(pos, neg);

        let mut hits: Vec<(String, Vec<Occurrence>)> = matched.into_iter().collect();
        if language == Language::Zh {
            drop_nested(&mut hits);
        }
        let mut ranked: Vec<(String, usize, usize)> = hits
            .into_iter()
            .filter_map(|(kw, occ)| Some((kw, occ.len(), occ.first()?.pos)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)).then(a.0.cmp(&b.0)));
        let keywords: Vec<String> = ranked
            .into_iter()
            .take(self.top_n)
            .map(|(kw, _, _)| kw)
            .collect();

        debug!(
            target: "classify",
            id = %anon_hash(text),
            %language,
            %category,
            difficulty_level,
            sentiment_score,
            pos,
            neg,
            "classified"
        );

        Ok(Classification {
            difficulty_level,
            category,
            sentiment_score,
            keywords,
        })
    }

    /// Detect language, classify and build the storable record.
    pub fn classify_post(&self, post: RawPost) -> Result<ClassifiedRecord, ClassificationError> {
        let language = self.detector.detect(&post.text);
        let c = self.classify(&post.text, language)?;
        counter!("classify_records_total").increment(1);
        Ok(ClassifiedRecord {
            post,
            language,
            difficulty_level: c.difficulty_level,
            category: c.category,
            sentiment_score: c.sentiment_score,
            keywords: c.keywords,
        })
    }
}

/// `(pos − neg) / max(1, pos + neg)`, clamped to [-1, 1]; no hits → 0.0.
pub fn sentiment_score(pos: usize, neg: usize) -> f32 {
    let total = (pos + neg).max(1) as f32;
    ((pos as f32 - neg as f32) / total).clamp(-1.0, 1.0)
}

fn validate(text: &str) -> Result<(), ClassificationError> {
    if text.contains('\0') {
        return Err(ClassificationError::Malformed("text contains NUL"));
    }
    let chars = text.chars().count();
    if chars > MAX_TEXT_CHARS {
        return Err(ClassificationError::TooLong {
            chars,
            max: MAX_TEXT_CHARS,
        });
    }
    Ok(())
}

fn note(matched: &mut HashMap<String, Vec<Occurrence>>, kw: &str, occ: &[Occurrence]) {
    if !occ.is_empty() {
        matched.entry(kw.to_string()).or_insert_with(|| occ.to_vec());
    }
}

/// Drop hits that sit inside a strictly longer hit of another group.
fn drop_nested<K>(groups: &mut [(K, Vec<Occurrence>)]) {
    let spans: Vec<(usize, usize)> = groups
        .iter()
        .flat_map(|(_, occ)| occ.iter().map(|o| (o.pos, o.end)))
        .collect();
    for (_, occ) in groups.iter_mut() {
        occ.retain(|o| {
            !spans
                .iter()
                .any(|&(s, e)| s <= o.pos && o.end <= e && e - s > o.end - o.pos)
        });
    }
}

#[derive(Debug, Clone, Copy)]
struct Occurrence {
    /// Byte span in the lowercased text.
    pos: usize,
    end: usize,
    negated: bool,
}

#[derive(Debug)]
struct Token {
    start: usize,
    end: usize,
}

/// Lowercased text plus (for English) its token spans, built once per call.
struct TextCtx<'a> {
    lang: Language,
    lower: String,
    tokens: Vec<Token>,
    negators: &'a [String],
}

impl<'a> TextCtx<'a> {
    fn new(text: &str, lang: Language, negators: &'a [String]) -> Self {
        let lower = text.to_lowercase().replace('\u{2019}', "'");
        let tokens = match lang {
            Language::En => tokenize(&lower),
            Language::Zh => Vec::new(),
        };
        Self {
            lang,
            lower,
            tokens,
            negators,
        }
    }

    fn token(&self, i: usize) -> &str {
        let t = &self.tokens[i];
        &self.lower[t.start..t.end]
    }

    /// Hits for every word, in input order. Chinese hits that sit inside a
    /// longer hit from the same list are dropped ("卡" inside "卡顿").
    fn find_all<'w>(
        &self,
        words: impl IntoIterator<Item = &'w String>,
    ) -> Vec<(&'w str, Vec<Occurrence>)> {
        let mut found: Vec<(&'w str, Vec<Occurrence>)> = words
            .into_iter()
            .map(|w| (w.as_str(), self.find(w)))
            .collect();
        if self.lang == Language::Zh {
            drop_nested(&mut found);
        }
        found
    }

    fn find(&self, kw: &str) -> Vec<Occurrence> {
        match self.lang {
            Language::En => self.find_tokens(kw),
            Language::Zh => self.find_substr(kw),
        }
    }

    fn find_tokens(&self, kw: &str) -> Vec<Occurrence> {
        let parts: Vec<&str> = kw.split_whitespace().collect();
        if parts.is_empty() || parts.len() > self.tokens.len() {
            return Vec::new();
        }
        let last = parts.len() - 1;
        let mut out = Vec::new();
        for i in 0..=(self.tokens.len() - parts.len()) {
            let hit = parts.iter().enumerate().all(|(j, p)| {
                let tok = self.token(i + j);
                if j == last {
                    token_matches(tok, p)
                } else {
                    tok == *p
                }
            });
            if hit {
                let from = i.saturating_sub(EN_NEGATION_WINDOW);
                let negated = (from..i).any(|k| self.negators.iter().any(|n| n == self.token(k)));
                out.push(Occurrence {
                    pos: self.tokens[i].start,
                    end: self.tokens[i + last].end,
                    negated,
                });
            }
        }
        out
    }

    fn find_substr(&self, kw: &str) -> Vec<Occurrence> {
        self.lower
            .match_indices(kw)
            .map(|(pos, _)| {
                let before = &self.lower[..pos];
                let negated = self.negators.iter().any(|n| before.ends_with(n.as_str()));
                Occurrence {
                    pos,
                    end: pos + kw.len(),
                    negated,
                }
            })
            .collect()
    }
}

fn token_matches(tok: &str, word: &str) -> bool {
    tok == word
        || tok
            .strip_prefix(word)
            .is_some_and(|rest| EN_SUFFIXES.contains(&rest))
}

/// Alphanumeric runs; apostrophes inside a word are kept ("doesn't").
fn tokenize(s: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let inner_apostrophe = c == '\''
            && start.is_some()
            && chars.peek().is_some_and(|(_, n)| n.is_alphanumeric());
        if c.is_alphanumeric() || inner_apostrophe {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(st) = start.take() {
            out.push(Token { start: st, end: i });
        }
    }
    if let Some(st) = start {
        out.push(Token {
            start: st,
            end: s.len(),
        });
    }
    out
}
