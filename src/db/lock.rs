// src/db/lock.rs

//! Advisory lock over the package index directory
//!
//! Every index-mutating transaction holds an exclusive lock on
//! `<db_dir>/.lock` until it finishes. The lock is advisory: it serialises
//! mpkg processes, not arbitrary writers.

use crate::error::{Error, Result};
use fs4::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held exclusive lock; released when dropped
#[derive(Debug)]
pub struct IndexLock {
    _file: File,
    path: PathBuf,
}

impl IndexLock {
    /// Take the lock without waiting
    ///
    /// Returns `Error::Locked` if another process already holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!(
                    "Failed to create lock directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::IoError(format!("Failed to open lock {}: {}", path.display(), e)))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired index lock {}", path.display());
                Ok(Self {
                    _file: file,
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                Err(Error::Locked(path.display().to_string()))
            }
            Err(e) => Err(Error::IoError(format!("Failed to lock {}: {}", path.display(), e))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        debug!("Released index lock {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("db/.lock");

        let first = IndexLock::acquire(&path).unwrap();
        assert_eq!(first.path(), path.as_path());

        let second = IndexLock::acquire(&path);
        assert!(matches!(second, Err(Error::Locked(_))));

        drop(first);
        assert!(IndexLock::acquire(&path).is_ok());
    }
}
