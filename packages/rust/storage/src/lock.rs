//! Filesystem lock marker.
//!
//! The marker file's existence is the lock. It is created with `create_new`,
//! so acquisition never waits: a present marker fails immediately with
//! [`TaxwatchError::RepositoryLocked`]. The file body (PID and acquisition
//! time) is diagnostic only. A marker left behind by a crashed process is not
//! expired automatically and has to be removed by an operator.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use taxwatch_shared::{Result, TaxwatchError};

/// A held lock marker. Dropping it removes the file.
#[derive(Debug)]
pub struct LockMarker {
    path: PathBuf,
}

impl LockMarker {
    /// Create the marker at `path`, failing fast if it already exists.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| TaxwatchError::io(parent, e))?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(TaxwatchError::RepositoryLocked {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(TaxwatchError::io(path, e)),
        };

        // From here on the marker exists; Drop cleans it up even if the write fails.
        let marker = Self {
            path: path.to_path_buf(),
        };
        writeln!(
            file,
            "pid={}\nacquired_at={}",
            std::process::id(),
            Utc::now().to_rfc3339()
        )
        .map_err(|e| TaxwatchError::io(path, e))?;

        debug!(path = %path.display(), "lock acquired");
        Ok(marker)
    }

    /// Whether a marker is present at `path`.
    pub fn is_held(path: &Path) -> bool {
        path.exists()
    }

    /// Contents of the marker at `path`, if any.
    pub fn holder(path: &Path) -> Option<String> {
        fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().replace('\n', ", "))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockMarker {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "lock released"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove lock marker"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.lock");

        let first = LockMarker::acquire(&path).unwrap();
        assert!(LockMarker::is_held(&path));

        let err = LockMarker::acquire(&path).unwrap_err();
        assert!(matches!(err, TaxwatchError::RepositoryLocked { .. }));

        drop(first);
        assert!(!LockMarker::is_held(&path));
        let again = LockMarker::acquire(&path).unwrap();
        assert_eq!(again.path(), path.as_path());
    }

    #[test]
    fn marker_records_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("run.lock");

        let _lock = LockMarker::acquire(&path).unwrap();
        let holder = LockMarker::holder(&path).unwrap();
        assert!(holder.contains(&format!("pid={}", std::process::id())));
        assert!(holder.contains("acquired_at="));
    }

    #[test]
    fn stale_marker_is_not_expired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.lock");
        fs::write(&path, "").unwrap();

        assert!(LockMarker::acquire(&path).is_err());
        assert!(LockMarker::holder(&path).is_some());
    }
}
