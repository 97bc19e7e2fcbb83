// src/db/mod.rs

//! Installed package index
//!
//! The index is a directory of plain files, one record and one manifest per
//! package:
//! - `<name>.installed`: the installed package record
//! - `<name>.files`: the file manifest
//!
//! Writes land in a temporary file first and are renamed into place, so a
//! reader never observes a half-written record. The action history lives in
//! an SQLite database next to them (see `history`).

pub mod history;
pub mod lock;
pub mod models;
pub mod schema;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packages::descriptor::validate_name;
use models::{FileManifest, InstalledPackage};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const RECORD_SUFFIX: &str = ".installed";
const MANIFEST_SUFFIX: &str = ".files";

/// Handle on the index directory
#[derive(Debug, Clone)]
pub struct PackageIndex {
    dir: PathBuf,
}

impl PackageIndex {
    /// Open the index described by the configuration, creating it if needed
    pub fn open(config: &Config) -> Result<Self> {
        Self::at(&config.db_dir)
    }

    /// Open the index stored in `dir`, creating it if needed
    pub fn at(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| {
            Error::InitError(format!("Failed to create index directory {}: {}", dir.display(), e))
        })?;
        debug!("Using package index at {}", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}{}", name, RECORD_SUFFIX)))
    }

    fn manifest_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{}{}", name, MANIFEST_SUFFIX)))
    }

    /// Whether an installed record exists for `name`
    ///
    /// Names that can't be index keys are never installed.
    pub fn is_installed(&self, name: &str) -> bool {
        match self.record_path(name) {
            Ok(path) => path.is_file(),
            Err(_) => false,
        }
    }

    /// Read the installed record for `name`
    pub fn read_record(&self, name: &str) -> Result<Option<InstalledPackage>> {
        InstalledPackage::read_from(&self.record_path(name)?)
    }

    /// Create or overwrite the installed record keyed by its name
    pub fn write_record(&self, record: &InstalledPackage) -> Result<()> {
        let path = self.record_path(record.name())?;
        self.write_atomic(&path, record.to_record().as_bytes())?;
        debug!("Wrote record {}", path.display());
        Ok(())
    }

    /// Delete the installed record; returns whether one existed
    pub fn delete_record(&self, name: &str) -> Result<bool> {
        remove_if_exists(&self.record_path(name)?)
    }

    /// Read the file manifest for `name`
    pub fn read_manifest(&self, name: &str) -> Result<Option<FileManifest>> {
        let path = self.manifest_path(name)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(FileManifest::parse(&content))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::IoError(format!(
                "Failed to read manifest {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Create or overwrite the file manifest for `name`
    pub fn write_manifest(&self, name: &str, manifest: &FileManifest) -> Result<()> {
        let path = self.manifest_path(name)?;
        self.write_atomic(&path, manifest.to_text().as_bytes())?;
        debug!("Wrote manifest {} ({} paths)", path.display(), manifest.len());
        Ok(())
    }

    /// Delete the file manifest; returns whether one existed
    pub fn delete_manifest(&self, name: &str) -> Result<bool> {
        remove_if_exists(&self.manifest_path(name)?)
    }

    /// Names of all installed packages, sorted
    pub fn installed_names(&self) -> Result<Vec<String>> {
        self.names_with_suffix(RECORD_SUFFIX)
    }

    /// Names of all packages owning a manifest, sorted
    pub fn manifest_names(&self) -> Result<Vec<String>> {
        self.names_with_suffix(MANIFEST_SUFFIX)
    }

    /// All installed records, sorted by name
    ///
    /// A record that vanishes between listing and reading is skipped.
    pub fn records(&self) -> Result<Vec<InstalledPackage>> {
        let mut records = Vec::new();
        for name in self.installed_names()? {
            if let Some(record) = self.read_record(&name)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn names_with_suffix(&self, suffix: &str) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            Error::IoError(format!("Failed to list index {}: {}", self.dir.display(), e))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name.strip_suffix(suffix) {
                if validate_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let io_err = |e: std::io::Error| {
            Error::IoError(format!("Failed to write {}: {}", path.display(), e))
        };

        let mut temp = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        temp.write_all(contents).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::IoError(format!(
            "Failed to delete {}: {}",
            path.display(),
            e
        ))),
    }
}
