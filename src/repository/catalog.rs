// src/repository/catalog.rs

//! Repository descriptor cache (`repo.db`)
//!
//! A flat file of blocks, each starting with `name=` and followed by
//! `version=` and `description=` lines. A block ends at the next `name=` line
//! or at end of file.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use tracing::debug;

/// One package advertised by the repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Parsed repository catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Parse catalog content
    ///
    /// Lines before the first `name=` and unknown keys are ignored. Later
    /// fields of a block override earlier ones.
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        let mut current: Option<CatalogEntry> = None;

        for line in content.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            if key == "name" {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
                current = Some(CatalogEntry {
                    name: value.to_string(),
                    ..CatalogEntry::default()
                });
                continue;
            }

            let Some(entry) = current.as_mut() else {
                continue;
            };
            match key {
                "version" => entry.version = value.to_string(),
                "description" => entry.description = value.to_string(),
                _ => {}
            }
        }

        if let Some(entry) = current {
            entries.push(entry);
        }

        Self { entries }
    }

    /// Load the catalog file
    ///
    /// A missing file means the repository was never synced and is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!(
                "Failed to read repository catalog {} (run 'mpkg update' to sync): {}",
                path.display(),
                e
            ))
        })?;
        let catalog = Self::parse(&content);
        debug!("Loaded {} catalog entries from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    /// First entry with exactly this name
    pub fn find(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Version advertised for `name`, if any and non-empty
    pub fn version_of(&self, name: &str) -> Option<&str> {
        self.find(name)
            .map(|entry| entry.version.as_str())
            .filter(|version| !version.is_empty())
    }

    /// Entries whose name contains `query`
    pub fn search<'a>(&'a self, query: &'a str) -> impl Iterator<Item = &'a CatalogEntry> + 'a {
        self.entries.iter().filter(move |entry| entry.name.contains(query))
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
name=foo
version=1.1
description=The foo tool
name=bar
description=Bar without a version
name=foobar
version=0.3
description=Both
";

    #[test]
    fn test_parse_blocks() {
        let catalog = Catalog::parse(SAMPLE);
        assert_eq!(catalog.len(), 3);

        let foo = catalog.find("foo").unwrap();
        assert_eq!(foo.version, "1.1");
        assert_eq!(foo.description, "The foo tool");
    }

    #[test]
    fn test_version_does_not_leak_across_blocks() {
        let catalog = Catalog::parse(SAMPLE);
        // bar's block has no version; the next block's version must not be used
        assert_eq!(catalog.version_of("bar"), None);
        assert_eq!(catalog.version_of("foobar"), Some("0.3"));
        assert_eq!(catalog.version_of("missing"), None);
    }

    #[test]
    fn test_search_by_substring() {
        let catalog = Catalog::parse(SAMPLE);
        let names: Vec<_> = catalog.search("foo").map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["foo", "foobar"]);
    }

    #[test]
    fn test_lines_before_first_block_ignored() {
        let catalog = Catalog::parse("version=9\n\nname=x\nversion=1\n");
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.version_of("x"), Some("1"));
    }

    #[test]
    fn test_load_missing_file() {
        let result = Catalog::load(Path::new("/nonexistent/repo.db"));
        assert!(matches!(result, Err(Error::IoError(_))));
    }
}
