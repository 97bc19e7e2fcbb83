// src/filesystem/journal.rs

//! Undo journal for in-flight transactions
//!
//! Extraction records every file and directory it creates. If a later step
//! fails, rolling back the journal deletes them again, newest first, so an
//! aborted install leaves the filesystem as it found it. Paths that already
//! existed are never journaled and therefore never deleted.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Created {
    File,
    Dir,
}

/// Paths created by the current transaction, in creation order
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<(PathBuf, Created)>,
}

/// Result of undoing a journal
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub removed: usize,
    /// Directories left in place because something else now lives in them
    pub kept: usize,
    pub failed: usize,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file (or symlink) about to be created
    pub fn record_file(&mut self, path: &Path) {
        self.entries.push((path.to_path_buf(), Created::File));
    }

    /// Record a directory about to be created
    pub fn record_dir(&mut self, path: &Path) {
        self.entries.push((path.to_path_buf(), Created::Dir));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep everything that was written
    pub fn commit(self) {
        debug!("Committed journal with {} entries", self.entries.len());
    }

    /// Delete everything that was written, newest first
    pub fn rollback(self) -> RollbackReport {
        let mut report = RollbackReport::default();

        for (path, kind) in self.entries.into_iter().rev() {
            let result = match kind {
                Created::File => fs::remove_file(&path),
                Created::Dir => fs::remove_dir(&path),
            };

            match result {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(_) if kind == Created::Dir && dir_has_entries(&path) => report.kept += 1,
                Err(e) => {
                    warn!("Rollback could not remove {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Rolled back journal: {} removed, {} kept, {} failed",
            report.removed, report.kept, report.failed
        );
        report
    }
}

fn dir_has_entries(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
