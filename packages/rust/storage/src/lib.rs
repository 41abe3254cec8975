//! Durable concept storage.
//!
//! [`RecordStore`] is the query and mutation surface shared by the pipeline
//! and the CLI. [`CsvRecordStore`] keeps the dataset in a single CSV file.
//!
//! **Access rules:**
//! - Reads never take the lock and may run concurrently.
//! - Mutations (`save`, `delete`, `clear_all`, `restore`) hold the lock
//!   marker for their duration and fail fast with `RepositoryLocked` when
//!   another writer has it.
//! - Every write replaces the file atomically (temp file + rename).

mod csv_store;
mod lock;
pub mod query;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use taxwatch_shared::{Concept, ConceptFilter, Result, SearchPage, SearchQuery};

pub use csv_store::CsvRecordStore;
pub use lock::LockMarker;

/// Keyed-by-link collection of concepts.
pub trait RecordStore: Send + Sync {
    /// Filtered page in store order (theme asc, date desc).
    fn get_all(&self, filter: &ConceptFilter, limit: usize, offset: usize) -> Result<Vec<Concept>>;

    fn get_by_id(&self, link: &str) -> Result<Option<Concept>>;

    fn exists(&self, link: &str) -> Result<bool> {
        Ok(self.get_by_id(link)?.is_some())
    }

    fn search(&self, query: &SearchQuery) -> Result<SearchPage>;

    /// Distinct themes, sorted.
    fn themes(&self) -> Result<Vec<String>>;

    /// Newest first.
    fn latest(&self, limit: usize) -> Result<Vec<Concept>>;

    fn count(&self) -> Result<usize>;

    /// Every stored link.
    fn links(&self) -> Result<HashSet<String>>;

    /// Whether a writer currently holds the lock marker.
    fn is_locked(&self) -> bool;

    /// Where the lock marker lives.
    fn lock_path(&self) -> &Path;

    /// Merge by link (incoming values win), sort, replace atomically.
    fn save(&self, concepts: &[Concept]) -> Result<()>;

    /// Returns `false` when the link is not stored.
    fn delete(&self, link: &str) -> Result<bool>;

    fn clear_all(&self) -> Result<()>;

    /// Timestamped copy next to the store file. Returns its path.
    fn backup(&self) -> Result<PathBuf>;

    /// Replace the store with the backup at `path` after backing up the
    /// current state. Returns the path of that safety backup.
    fn restore(&self, path: &Path) -> Result<PathBuf>;

    /// Path of the backing file.
    fn location(&self) -> &Path;
}
