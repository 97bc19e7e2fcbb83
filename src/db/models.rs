// src/db/models.rs

//! Data models for the package index
//!
//! The index stores two kinds of entries per package: the installed record
//! (`<name>.installed`) and the file manifest (`<name>.files`). This module
//! defines both types and their on-disk text encoding; `PackageIndex` does
//! the file I/O.

use crate::error::{Error, Result};
use crate::packages::descriptor::{PackageDescriptor, parse_fields};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Persisted proof that a package is installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub descriptor: PackageDescriptor,
    /// Unix seconds at which the record was written
    pub install_time: i64,
    pub installed: bool,
}

impl InstalledPackage {
    /// Create a record for a freshly installed package
    pub fn new(descriptor: PackageDescriptor, install_time: i64) -> Self {
        Self {
            descriptor,
            install_time,
            installed: true,
        }
    }

    /// Package name (the index key)
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Decode a record file's content
    pub fn parse(content: &str) -> Result<Self> {
        let mut descriptor = PackageDescriptor::default();
        let mut install_time = 0;
        let mut installed = false;

        for (key, value) in parse_fields(content)? {
            if descriptor.apply_field(key, value) {
                continue;
            }
            match key {
                "install_time" => install_time = value.parse().unwrap_or(0),
                "installed" => installed = value == "1",
                _ => {}
            }
        }

        if descriptor.name.is_empty() {
            return Err(Error::ParseError("Installed record has no name".to_string()));
        }

        Ok(Self {
            descriptor,
            install_time,
            installed,
        })
    }

    /// Read and decode a record file, `None` if it doesn't exist
    pub fn read_from(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::IoError(format!(
                "Failed to read record {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Encode for the record file
    pub fn to_record(&self) -> String {
        let mut out = self.descriptor.to_fields();
        let _ = writeln!(out, "install_time={}", self.install_time);
        let _ = writeln!(out, "installed={}", if self.installed { 1 } else { 0 });
        out
    }
}

/// Ordered, duplicate-free list of absolute paths owned by one package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileManifest {
    paths: Vec<String>,
    seen: HashSet<String>,
}

impl FileManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a path; returns false if it was already present
    pub fn push(&mut self, path: impl Into<String>) -> bool {
        let path = path.into();
        if self.seen.contains(&path) {
            return false;
        }
        self.seen.insert(path.clone());
        self.paths.push(path);
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.seen.contains(path)
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Decode a manifest file: one path per line, blank lines ignored
    ///
    /// Lines are kept byte for byte. A path is exactly what `to_text` wrote.
    pub fn parse(content: &str) -> Self {
        content
            .split('\n')
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Encode for the manifest file
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.paths.iter().map(|p| p.len() + 1).sum());
        for path in &self.paths {
            out.push_str(path);
            out.push('\n');
        }
        out
    }
}

impl FromIterator<String> for FileManifest {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut manifest = Self::new();
        for path in iter {
            manifest.push(path);
        }
        manifest
    }
}
