// src/store.rs
//! Upsert-keyed record store. `source_id` is the primary key; a second upsert
//! of the same key replaces the record in place.
//!
//! `MemoryStore` is the in-process variant, `JsonlStore` adds a JSON-lines file
//! rewritten atomically (temp file + rename) on every write.

use chrono::NaiveDate;
use metrics::counter;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::language::Language;
use crate::lexicon::Category;
use crate::model::ClassifiedRecord;

pub trait RecordStore: Send + Sync {
    /// Insert, or replace every field of the record with the same `source_id`.
    fn upsert(&self, record: ClassifiedRecord) -> Result<(), StorageError>;

    fn upsert_all(&self, records: Vec<ClassifiedRecord>) -> Result<usize, StorageError> {
        let n = records.len();
        for r in records {
            self.upsert(r)?;
        }
        Ok(n)
    }

    fn get(&self, source_id: &str) -> Result<Option<ClassifiedRecord>, StorageError>;

    fn query_by(&self, filter: &RecordFilter) -> Result<RecordCursor, StorageError>;

    fn len(&self) -> Result<usize, StorageError>;
}

/// Predicate over date, difficulty, category (and language / complaint flag).
/// Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub difficulty: Option<u8>,
    pub category: Option<Category>,
    pub language: Option<Language>,
    pub complaints_only: bool,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn on_date(mut self, d: NaiveDate) -> Self {
        self.date_from = Some(d);
        self.date_to = Some(d);
        self
    }

    /// Inclusive range.
    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.date_from = Some(from);
        self.date_to = Some(to);
        self
    }

    pub fn difficulty(mut self, level: u8) -> Self {
        self.difficulty = Some(level);
        self
    }

    pub fn category(mut self, c: Category) -> Self {
        self.category = Some(c);
        self
    }

    pub fn language(mut self, l: Language) -> Self {
        self.language = Some(l);
        self
    }

    pub fn complaints_only(mut self) -> Self {
        self.complaints_only = true;
        self
    }

    pub fn matches(&self, r: &ClassifiedRecord) -> bool {
        let d = r.date();
        self.date_from.map_or(true, |f| d >= f)
            && self.date_to.map_or(true, |t| d <= t)
            && self.difficulty.map_or(true, |lvl| r.difficulty_level == lvl)
            && self.category.map_or(true, |c| r.category == c)
            && self.language.map_or(true, |l| r.language == l)
            && (!self.complaints_only || r.is_complaint())
    }
}

/// Finite, restartable view over a store snapshot. The snapshot holds shared
/// handles to the stored records, taken once per write generation; filtering
/// and cloning happen lazily as the cursor advances. Later upserts do not
/// affect a cursor that already exists.
#[derive(Debug, Clone)]
pub struct RecordCursor {
    snapshot: Arc<Vec<Arc<ClassifiedRecord>>>,
    filter: RecordFilter,
    pos: usize,
}

impl RecordCursor {
    fn new(snapshot: Arc<Vec<Arc<ClassifiedRecord>>>, filter: RecordFilter) -> Self {
        Self {
            snapshot,
            filter,
            pos: 0,
        }
    }

    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for RecordCursor {
    type Item = ClassifiedRecord;

    fn next(&mut self) -> Option<ClassifiedRecord> {
        while let Some(r) = self.snapshot.get(self.pos) {
            self.pos += 1;
            if self.filter.matches(r) {
                return Some(ClassifiedRecord::clone(r));
            }
        }
        None
    }
}

/// Keyed records plus a cached snapshot for cursors; the cache is dropped on write.
#[derive(Debug, Default)]
struct Records {
    map: BTreeMap<String, Arc<ClassifiedRecord>>,
    snapshot: Option<Arc<Vec<Arc<ClassifiedRecord>>>>,
}

impl Records {
    fn insert(&mut self, record: ClassifiedRecord) -> Option<Arc<ClassifiedRecord>> {
        self.snapshot = None;
        self.map.insert(record.source_id().to_string(), Arc::new(record))
    }

    fn restore(&mut self, key: &str, prev: Option<Arc<ClassifiedRecord>>) {
        self.snapshot = None;
        match prev {
            Some(p) => {
                self.map.insert(key.to_string(), p);
            }
            None => {
                self.map.remove(key);
            }
        }
    }

    fn get(&self, source_id: &str) -> Option<ClassifiedRecord> {
        self.map.get(source_id).map(|r| ClassifiedRecord::clone(r))
    }

    fn snapshot(&mut self) -> Arc<Vec<Arc<ClassifiedRecord>>> {
        self.snapshot
            .get_or_insert_with(|| Arc::new(self.map.values().cloned().collect()))
            .clone()
    }
}

fn read(lock: &RwLock<Records>) -> Result<RwLockReadGuard<'_, Records>, StorageError> {
    lock.read().map_err(|_| StorageError::Poisoned)
}

fn write(lock: &RwLock<Records>) -> Result<RwLockWriteGuard<'_, Records>, StorageError> {
    lock.write().map_err(|_| StorageError::Poisoned)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for MemoryStore {
    fn upsert(&self, record: ClassifiedRecord) -> Result<(), StorageError> {
        write(&self.inner)?.insert(record);
        counter!("store_upserts_total").increment(1);
        Ok(())
    }

    fn get(&self, source_id: &str) -> Result<Option<ClassifiedRecord>, StorageError> {
        Ok(read(&self.inner)?.get(source_id))
    }

    fn query_by(&self, filter: &RecordFilter) -> Result<RecordCursor, StorageError> {
        let snap = write(&self.inner)?.snapshot();
        Ok(RecordCursor::new(snap, filter.clone()))
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(read(&self.inner)?.map.len())
    }
}

/// JSON-lines file store. The whole file is rewritten through a temp file and
/// renamed into place while the write lock is held, so a crash leaves either
/// the old or the new file, never a half-written record.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    inner: RwLock<Records>,
}

impl JsonlStore {
    /// Open (or create on first write) the store at `path`. Later lines win
    /// over earlier ones with the same key.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let mut records = Records::default();
        if path.exists() {
            let f = fs::File::open(&path)?;
            for line in BufReader::new(f).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let rec: ClassifiedRecord = serde_json::from_str(&line)?;
                records.insert(rec);
            }
        }
        info!(target: "store", path = %path.display(), records = records.map.len(), "store opened");
        Ok(Self {
            path,
            inner: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &Records) -> Result<(), StorageError> {
        write_jsonl_atomic(&self.path, records.map.values().map(|r| &**r))?;
        debug!(target: "store", records = records.map.len(), "store persisted");
        Ok(())
    }
}

impl RecordStore for JsonlStore {
    fn upsert(&self, record: ClassifiedRecord) -> Result<(), StorageError> {
        let mut guard = write(&self.inner)?;
        let key = record.source_id().to_string();
        let prev = guard.insert(record);
        if let Err(e) = self.persist(&guard) {
            guard.restore(&key, prev);
            return Err(e);
        }
        counter!("store_upserts_total").increment(1);
        Ok(())
    }

    /// One file rewrite for the whole batch; on failure nothing is applied.
    fn upsert_all(&self, records: Vec<ClassifiedRecord>) -> Result<usize, StorageError> {
        let n = records.len();
        if n == 0 {
            return Ok(0);
        }
        let mut guard = write(&self.inner)?;
        let mut undo = Vec::with_capacity(n);
        for r in records {
            let key = r.source_id().to_string();
            let prev = guard.insert(r);
            undo.push((key, prev));
        }
        if let Err(e) = self.persist(&guard) {
            for (key, prev) in undo.into_iter().rev() {
                guard.restore(&key, prev);
            }
            return Err(e);
        }
        counter!("store_upserts_total").increment(n as u64);
        Ok(n)
    }

    fn get(&self, source_id: &str) -> Result<Option<ClassifiedRecord>, StorageError> {
        Ok(read(&self.inner)?.get(source_id))
    }

    fn query_by(&self, filter: &RecordFilter) -> Result<RecordCursor, StorageError> {
        let snap = write(&self.inner)?.snapshot();
        Ok(RecordCursor::new(snap, filter.clone()))
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(read(&self.inner)?.map.len())
    }
}

/// Write records as JSON lines to `path` via `<path>.tmp` + rename.
pub(crate) fn write_jsonl_atomic<'a, I>(path: &Path, records: I) -> Result<(), StorageError>
where
    I: IntoIterator<Item = &'a ClassifiedRecord>,
{
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let f = fs::File::create(&tmp)?;
    let mut w = BufWriter::new(f);
    for r in records {
        serde_json::to_writer(&mut w, r)?;
        w.write_all(b"\n")?;
    }
    let f = w.into_inner().map_err(|e| e.into_error())?;
    f.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}
