// src/views.rs
//! Derived views over the store: grouping by date / difficulty / category,
//! on-disk materialization, and summary statistics for reporting.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::StorageError;
use crate::language::Language;
use crate::lexicon::Category;
use crate::model::ClassifiedRecord;
use crate::store::{write_jsonl_atomic, RecordFilter, RecordStore};

#[derive(Debug, Clone, Default)]
pub struct Grouped {
    pub by_date: BTreeMap<NaiveDate, Vec<ClassifiedRecord>>,
    pub by_difficulty: BTreeMap<u8, Vec<ClassifiedRecord>>,
    pub by_category: BTreeMap<Category, Vec<ClassifiedRecord>>,
}

/// Each group is ordered by `created_at`, then `source_id`.
pub fn group<I>(records: I) -> Grouped
where
    I: IntoIterator<Item = ClassifiedRecord>,
{
    let mut g = Grouped::default();
    for r in records {
        g.by_date.entry(r.date()).or_default().push(r.clone());
        g.by_difficulty
            .entry(r.difficulty_level)
            .or_default()
            .push(r.clone());
        g.by_category.entry(r.category).or_default().push(r);
    }
    let sort = |v: &mut Vec<ClassifiedRecord>| {
        v.sort_by(|a, b| {
            a.post
                .created_at
                .cmp(&b.post.created_at)
                .then_with(|| a.source_id().cmp(b.source_id()))
        })
    };
    g.by_date.values_mut().for_each(sort);
    g.by_difficulty.values_mut().for_each(sort);
    g.by_category.values_mut().for_each(sort);
    g
}

/// Rewrite `by_date/`, `by_difficulty/` and `by_category/` under `dir` from the
/// current store contents. View files with no records left are removed.
/// Returns the number of files written.
pub fn materialize(store: &dyn RecordStore, dir: &Path) -> Result<usize, StorageError> {
    let g = group(store.query_by(&RecordFilter::all())?);

    let mut written = 0usize;
    written += write_view_dir(
        &dir.join("by_date"),
        g.by_date
            .iter()
            .map(|(d, v)| (format!("{}.jsonl", d.format("%Y-%m-%d")), v)),
    )?;
    written += write_view_dir(
        &dir.join("by_difficulty"),
        g.by_difficulty
            .iter()
            .map(|(lvl, v)| (format!("level_{lvl}.jsonl"), v)),
    )?;
    written += write_view_dir(
        &dir.join("by_category"),
        g.by_category
            .iter()
            .map(|(c, v)| (format!("{}.jsonl", c.as_str()), v)),
    )?;

    info!(target: "store", dir = %dir.display(), files = written, "views materialized");
    Ok(written)
}

fn write_view_dir<'a, I>(dir: &Path, files: I) -> Result<usize, StorageError>
where
    I: IntoIterator<Item = (String, &'a Vec<ClassifiedRecord>)>,
{
    fs::create_dir_all(dir)?;
    let mut keep: HashSet<PathBuf> = HashSet::new();
    for (name, records) in files {
        let p = dir.join(name);
        write_jsonl_atomic(&p, records.iter())?;
        keep.insert(p);
    }
    for entry in fs::read_dir(dir)? {
        let p = entry?.path();
        let is_view = p.extension().and_then(|e| e.to_str()) == Some("jsonl");
        if is_view && !keep.contains(&p) {
            fs::remove_file(&p)?;
        }
    }
    Ok(keep.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SentimentStats {
    pub mean: f64,
    pub min: f32,
    pub max: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopComplaint {
    pub source_id: String,
    pub text: String,
    pub category: Category,
    pub difficulty_level: u8,
    pub sentiment_score: f32,
    pub weighted_engagement: f64,
}

/// Aggregate statistics for a record set. Rendering is left to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub complaints: usize,
    pub by_language: BTreeMap<Language, usize>,
    pub by_difficulty: BTreeMap<u8, usize>,
    pub by_category: BTreeMap<Category, usize>,
    pub sentiment: Option<SentimentStats>,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
    /// Complaints ranked by likes + 2·reposts + 1.5·replies.
    pub top_complaints: Vec<TopComplaint>,
}

impl Summary {
    pub fn from_records<'a, I>(records: I, top_n: usize) -> Self
    where
        I: IntoIterator<Item = &'a ClassifiedRecord>,
    {
        let mut s = Summary {
            total: 0,
            complaints: 0,
            by_language: BTreeMap::new(),
            by_difficulty: BTreeMap::new(),
            by_category: BTreeMap::new(),
            sentiment: None,
            date_range: None,
            top_complaints: Vec::new(),
        };
        let mut sum = 0f64;
        let mut ranked: Vec<TopComplaint> = Vec::new();

        for r in records {
            s.total += 1;
            *s.by_language.entry(r.language).or_default() += 1;
            *s.by_difficulty.entry(r.difficulty_level).or_default() += 1;
            *s.by_category.entry(r.category).or_default() += 1;

            sum += f64::from(r.sentiment_score);
            s.sentiment = Some(match s.sentiment {
                None => SentimentStats {
                    mean: 0.0,
                    min: r.sentiment_score,
                    max: r.sentiment_score,
                },
                Some(st) => SentimentStats {
                    mean: 0.0,
                    min: st.min.min(r.sentiment_score),
                    max: st.max.max(r.sentiment_score),
                },
            });

            let d = r.date();
            s.date_range = Some(match s.date_range {
                None => (d, d),
                Some((lo, hi)) => (lo.min(d), hi.max(d)),
            });

            if r.is_complaint() {
                s.complaints += 1;
                ranked.push(TopComplaint {
                    source_id: r.source_id().to_string(),
                    text: r.post.text.clone(),
                    category: r.category,
                    difficulty_level: r.difficulty_level,
                    sentiment_score: r.sentiment_score,
                    weighted_engagement: r.post.engagement.weighted(),
                });
            }
        }

        if let Some(st) = s.sentiment.as_mut() {
            st.mean = sum / s.total as f64;
        }

        ranked.sort_by(|a, b| {
            b.weighted_engagement
                .total_cmp(&a.weighted_engagement)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        ranked.truncate(top_n);
        s.top_complaints = ranked;
        s
    }

    /// Summary over everything a store currently holds.
    pub fn from_store(store: &dyn RecordStore, top_n: usize) -> Result<Self, StorageError> {
        let all: Vec<ClassifiedRecord> = store.query_by(&RecordFilter::all())?.collect();
        Ok(Self::from_records(&all, top_n))
    }
}
