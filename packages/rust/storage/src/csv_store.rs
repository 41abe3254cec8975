//! CSV-backed [`RecordStore`].
//!
//! The whole dataset lives in one CSV file. Reads load the file without
//! locking. Every mutation takes the lock marker (`<store>.lock`), reloads,
//! applies the change and replaces the file by writing a temp file in the
//! same directory and renaming it over the target.

use std::collections::{HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use taxwatch_shared::{Concept, ConceptFilter, Result, SearchPage, SearchQuery, TaxwatchError};

use crate::RecordStore;
use crate::lock::LockMarker;
use crate::query;

/// Column order of the store file.
const COLUMNS: [&str; 7] = [
    "title",
    "date",
    "theme",
    "descriptor",
    "link",
    "summary",
    "analysis",
];

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

/// One CSV row. Absent enrichment is an empty string, never a null marker.
#[derive(Debug, Serialize, Deserialize)]
struct StoreRow {
    title: String,
    date: NaiveDate,
    theme: String,
    descriptor: String,
    link: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    analysis: String,
}

impl From<&Concept> for StoreRow {
    fn from(c: &Concept) -> Self {
        Self {
            title: c.title.clone(),
            date: c.date,
            theme: c.theme.clone(),
            descriptor: c.descriptor.clone(),
            link: c.link.clone(),
            summary: c.summary.clone().unwrap_or_default(),
            analysis: c.analysis.clone().unwrap_or_default(),
        }
    }
}

impl From<StoreRow> for Concept {
    fn from(row: StoreRow) -> Self {
        let mut concept = Concept::new(row.title, row.date, row.theme, row.descriptor, row.link);
        concept.summary = Some(row.summary);
        concept.analysis = Some(row.analysis);
        concept.cleaned()
    }
}

// ---------------------------------------------------------------------------
// CsvRecordStore
// ---------------------------------------------------------------------------

/// Record store persisted as a single CSV file.
#[derive(Debug, Clone)]
pub struct CsvRecordStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl CsvRecordStore {
    /// Store at `path`; the lock marker sits next to it with a `.lock` extension.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    /// Load the full dataset in file order. A missing file is an empty store.
    pub fn load(&self) -> Result<Vec<Concept>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        read_concepts(&self.path)
    }

    /// Run `op` while holding the store lock marker.
    fn with_lock<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        let _lock = LockMarker::acquire(&self.lock_path)?;
        op()
    }

    fn backup_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "store".into());
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");

        let mut candidate = dir.join(format!("{stem}_backup_{timestamp}.csv"));
        let mut suffix = 1;
        while candidate.exists() {
            candidate = dir.join(format!("{stem}_backup_{timestamp}_{suffix}.csv"));
            suffix += 1;
        }
        candidate
    }
}

impl RecordStore for CsvRecordStore {
    fn get_all(&self, filter: &ConceptFilter, limit: usize, offset: usize) -> Result<Vec<Concept>> {
        Ok(query::filter_page(self.load()?, filter, limit, offset))
    }

    fn get_by_id(&self, link: &str) -> Result<Option<Concept>> {
        Ok(self.load()?.into_iter().find(|c| c.link == link))
    }

    fn search(&self, query: &SearchQuery) -> Result<SearchPage> {
        query::search(self.load()?, query)
    }

    fn themes(&self) -> Result<Vec<String>> {
        Ok(query::themes(&self.load()?))
    }

    fn latest(&self, limit: usize) -> Result<Vec<Concept>> {
        Ok(query::latest(self.load()?, limit))
    }

    fn count(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    fn links(&self) -> Result<HashSet<String>> {
        Ok(self.load()?.into_iter().map(|c| c.link).collect())
    }

    fn is_locked(&self) -> bool {
        LockMarker::is_held(&self.lock_path)
    }

    fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    #[instrument(skip_all, fields(store = %self.path.display(), incoming = concepts.len()))]
    fn save(&self, concepts: &[Concept]) -> Result<()> {
        if concepts.is_empty() {
            return Ok(());
        }
        for concept in concepts {
            concept.validate()?;
        }

        self.with_lock(|| {
            let existing = self.load()?;
            let before = existing.len();

            let mut order: Vec<String> = Vec::with_capacity(before + concepts.len());
            let mut by_link: HashMap<String, Concept> = HashMap::with_capacity(order.capacity());
            for concept in existing
                .into_iter()
                .chain(concepts.iter().cloned().map(Concept::cleaned))
            {
                if !by_link.contains_key(&concept.link) {
                    order.push(concept.link.clone());
                }
                by_link.insert(concept.link.clone(), concept);
            }

            let mut merged: Vec<Concept> = order
                .into_iter()
                .filter_map(|link| by_link.remove(&link))
                .collect();
            query::sort_for_store(&mut merged);

            write_atomic(&self.path, &merged)?;
            info!(
                total = merged.len(),
                added = merged.len().saturating_sub(before),
                "store saved"
            );
            Ok(())
        })
    }

    #[instrument(skip_all, fields(store = %self.path.display(), link = %link))]
    fn delete(&self, link: &str) -> Result<bool> {
        self.with_lock(|| {
            let mut concepts = self.load()?;
            let before = concepts.len();
            concepts.retain(|c| c.link != link);

            if concepts.len() == before {
                debug!("nothing to delete");
                return Ok(false);
            }
            write_atomic(&self.path, &concepts)?;
            info!("concept deleted");
            Ok(true)
        })
    }

    #[instrument(skip_all, fields(store = %self.path.display()))]
    fn clear_all(&self) -> Result<()> {
        self.with_lock(|| {
            write_atomic(&self.path, &[])?;
            warn!("store cleared");
            Ok(())
        })
    }

    fn backup(&self) -> Result<PathBuf> {
        let target = self.backup_path();
        if self.path.exists() {
            fs::copy(&self.path, &target).map_err(|e| {
                TaxwatchError::repository(format!(
                    "failed to back up {} to {}: {e}",
                    self.path.display(),
                    target.display()
                ))
            })?;
        } else {
            write_atomic(&target, &[])?;
        }

        info!(backup = %target.display(), "store backed up");
        Ok(target)
    }

    #[instrument(skip_all, fields(store = %self.path.display(), from = %path.display()))]
    fn restore(&self, path: &Path) -> Result<PathBuf> {
        if !path.is_file() {
            return Err(TaxwatchError::repository(format!(
                "backup file not found: {}",
                path.display()
            )));
        }
        let mut restored = read_concepts(path)?;
        query::sort_for_store(&mut restored);

        self.with_lock(|| {
            let safety = self.backup()?;
            write_atomic(&self.path, &restored)?;
            info!(concepts = restored.len(), safety_backup = %safety.display(), "store restored");
            Ok(safety)
        })
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

fn read_concepts(path: &Path) -> Result<Vec<Concept>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| TaxwatchError::repository(format!("failed to open {}: {e}", path.display())))?;

    reader
        .deserialize::<StoreRow>()
        .enumerate()
        .map(|(index, row)| {
            row.map(Concept::from).map_err(|e| {
                TaxwatchError::repository(format!(
                    "{}: malformed row {}: {e}",
                    path.display(),
                    index + 1
                ))
            })
        })
        .collect()
}

/// Write `concepts` to a temp file next to `path`, fsync, then rename over it.
fn write_atomic(path: &Path, concepts: &[Concept]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    fs::create_dir_all(dir).map_err(|e| {
        TaxwatchError::repository(format!("failed to create {}: {e}", dir.display()))
    })?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".into());
    let temp_path = dir.join(format!(".{stem}.{}.tmp", Uuid::now_v7()));

    let result = write_rows(&temp_path, concepts).and_then(|()| {
        fs::rename(&temp_path, path).map_err(|e| {
            TaxwatchError::repository(format!(
                "failed to replace {} with {}: {e}",
                path.display(),
                temp_path.display()
            ))
        })
    });

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_rows(temp_path: &Path, concepts: &[Concept]) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(temp_path)
        .map_err(|e| write_error(temp_path, e))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    writer
        .write_record(COLUMNS)
        .map_err(|e| write_error(temp_path, e))?;
    for concept in concepts {
        writer
            .serialize(StoreRow::from(concept))
            .map_err(|e| write_error(temp_path, e))?;
    }

    let mut file = writer
        .into_inner()
        .map_err(|e| write_error(temp_path, e.error()))?;
    file.flush().map_err(|e| write_error(temp_path, e))?;
    file.sync_all().map_err(|e| write_error(temp_path, e))?;
    Ok(())
}

fn write_error(path: &Path, e: impl std::fmt::Display) -> TaxwatchError {
    TaxwatchError::repository(format!("failed to write {}: {e}", path.display()))
}
