// src/filesystem/extract.rs

//! Extraction engine
//!
//! Streams a package archive onto the install root, skipping metadata
//! entries, and builds the manifest of files written, hard links included. The process
//! working directory is never changed; entries are unpacked against an
//! explicit root.

use crate::config::Config;
use crate::db::PackageIndex;
use crate::db::models::FileManifest;
use crate::error::{Error, Result};
use crate::filesystem::journal::Journal;
use crate::packages::archive::{EntryTarget, PackageArchive, installs_file, manifest_path};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Unpacks archives beneath a root directory
#[derive(Debug, Clone)]
pub struct Extractor {
    root: PathBuf,
    preserve_ownership: bool,
}

impl Extractor {
    pub fn new(config: &Config) -> Self {
        Self {
            root: config.root.clone(),
            preserve_ownership: config.preserve_ownership,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Unpack every payload entry and return the manifest of regular files
    ///
    /// Each path created is recorded in `journal` before it is written, so
    /// the caller can undo a partial extraction. Nothing is rolled back here.
    pub fn extract(&self, archive: &PackageArchive, journal: &mut Journal) -> Result<FileManifest> {
        fs::create_dir_all(&self.root).map_err(|e| {
            Error::ExtractionError(format!(
                "Failed to create install root {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut tar = archive.tar().map_err(|e| Error::ExtractionError(e.to_string()))?;
        tar.set_preserve_permissions(true);
        tar.set_preserve_mtime(true);
        tar.set_preserve_ownerships(self.preserve_ownership);
        tar.set_overwrite(true);

        let mut manifest = FileManifest::new();
        let entries = tar
            .entries()
            .map_err(|e| Error::ExtractionError(format!("Failed to read archive entries: {}", e)))?;

        for entry in entries {
            let mut entry = entry
                .map_err(|e| Error::ExtractionError(format!("Failed to read archive entry: {}", e)))?;
            let raw_path = entry
                .path()
                .map_err(|e| Error::ExtractionError(format!("Failed to get entry path: {}", e)))?
                .into_owned();

            let relative = match EntryTarget::classify(&raw_path)? {
                EntryTarget::Metadata => {
                    debug!("Skipping metadata entry {}", raw_path.display());
                    continue;
                }
                EntryTarget::Root => continue,
                EntryTarget::Payload(relative) => relative,
            };

            let entry_type = entry.header().entry_type();
            if entry_type.is_hard_link() {
                check_hard_link_target(&entry, &raw_path)?;
            }
            let target = self.root.join(&relative);

            for dir in missing_ancestors(&self.root, &target) {
                journal.record_dir(&dir);
            }
            if fs::symlink_metadata(&target).is_err() {
                if entry_type.is_dir() {
                    journal.record_dir(&target);
                } else {
                    journal.record_file(&target);
                }
            } else if entry_type.is_file() {
                debug!("Overwriting existing {}", target.display());
            }

            debug!(" {}", relative.display());
            let unpacked = entry.unpack_in(&self.root).map_err(|e| {
                Error::ExtractionError(format!("Failed to unpack {}: {}", raw_path.display(), e))
            })?;
            if !unpacked {
                return Err(Error::ExtractionError(format!(
                    "Refusing to unpack {} outside the install root",
                    raw_path.display()
                )));
            }

            if installs_file(entry_type) {
                manifest.push(manifest_path(&relative));
            }
        }

        Ok(manifest)
    }
}

/// Extract a package and persist its manifest in the index
///
/// On success the returned manifest is already stored under `name`.
pub fn extract_package(
    extractor: &Extractor,
    index: &PackageIndex,
    name: &str,
    archive: &PackageArchive,
    journal: &mut Journal,
) -> Result<FileManifest> {
    info!("Unpacking {}", name);
    let manifest = extractor.extract(archive, journal)?;
    index.write_manifest(name, &manifest)?;
    info!("Unpacked {} files for {}", manifest.len(), name);
    Ok(manifest)
}

/// A hard link may only point at another payload path
fn check_hard_link_target<R: Read>(entry: &tar::Entry<'_, R>, raw_path: &Path) -> Result<()> {
    let link_name = entry
        .link_name()
        .map_err(|e| Error::ExtractionError(format!("Failed to get link target: {}", e)))?;
    match link_name.as_deref().map(EntryTarget::classify) {
        Some(Ok(EntryTarget::Payload(_))) => Ok(()),
        Some(Err(e)) => Err(e),
        _ => Err(Error::ExtractionError(format!(
            "Refusing hard link {} without a payload target",
            raw_path.display()
        ))),
    }
}

/// Directories between `root` and `target` that don't exist yet, outermost first
fn missing_ancestors(root: &Path, target: &Path) -> Vec<PathBuf> {
    let mut missing = Vec::new();
    let mut current = target.parent();

    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) || dir.exists() {
            break;
        }
        missing.push(dir.to_path_buf());
        current = dir.parent();
    }

    missing.reverse();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::archive::test_support::{TestEntry, write_package};

    fn setup() -> (tempfile::TempDir, Config) {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(temp_dir.path());
        config.ensure_dirs().unwrap();
        (temp_dir, config)
    }

    #[test]
    fn test_extract_writes_payload_and_skips_metadata() {
        let (temp_dir, config) = setup();
        let path = temp_dir.path().join("foo.tar.gz");
        write_package(
            &path,
            Some("name=foo\nversion=1.0\n"),
            &[
                TestEntry::Dir("usr/"),
                TestEntry::Dir("usr/bin/"),
                TestEntry::File("usr/bin/foo", b"#!/bin/sh\necho foo\n"),
                TestEntry::Symlink("usr/bin/foo2", "foo"),
                TestEntry::File("./FILES", b"usr/bin/foo\n"),
            ],
        );

        let extractor = Extractor::new(&config);
        let archive = PackageArchive::open(&path).unwrap();
        let mut journal = Journal::new();
        let manifest = extractor.extract(&archive, &mut journal).unwrap();

        assert_eq!(manifest.paths(), &["/usr/bin/foo".to_string()]);
        assert_eq!(
            fs::read(config.root.join("usr/bin/foo")).unwrap(),
            b"#!/bin/sh\necho foo\n"
        );
        assert!(fs::symlink_metadata(config.root.join("usr/bin/foo2")).unwrap().is_symlink());
        assert!(!config.root.join("PKGINFO").exists());
        assert!(!config.root.join("FILES").exists());
        journal.commit();
    }

    #[test]
    fn test_extract_preserves_permissions_and_mtime() {
        use std::os::unix::fs::PermissionsExt;

        let (temp_dir, config) = setup();
        let path = temp_dir.path().join("foo.tar.gz");
        write_package(&path, None, &[TestEntry::File("usr/bin/tool", b"x")]);

        let archive = PackageArchive::open(&path).unwrap();
        let mut journal = Journal::new();
        Extractor::new(&config).extract(&archive, &mut journal).unwrap();

        let metadata = fs::metadata(config.root.join("usr/bin/tool")).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o755);
        let mtime = metadata
            .modified()
            .unwrap()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert_eq!(mtime, 1_600_000_000);
    }

    #[test]
    fn test_rollback_after_extract_removes_everything() {
        let (temp_dir, config) = setup();
        let path = temp_dir.path().join("foo.tar.gz");
        write_package(
            &path,
            None,
            &[
                TestEntry::File("opt/foo/bin/foo", b"x"),
                TestEntry::File("opt/foo/share/data", b"y"),
            ],
        );

        let archive = PackageArchive::open(&path).unwrap();
        let mut journal = Journal::new();
        Extractor::new(&config).extract(&archive, &mut journal).unwrap();
        assert!(config.root.join("opt/foo/share/data").exists());

        journal.rollback();
        assert!(!config.root.join("opt").exists());
        assert!(config.root.exists());
    }

    #[test]
    fn test_extract_refuses_traversal() {
        let (temp_dir, config) = setup();
        let path = temp_dir.path().join("evil.tar.gz");
        write_package(
            &path,
            None,
            &[
                TestEntry::File("usr/bin/ok", b"x"),
                TestEntry::File("../escaped", b"x"),
            ],
        );

        let archive = PackageArchive::open(&path).unwrap();
        let mut journal = Journal::new();
        let result = Extractor::new(&config).extract(&archive, &mut journal);
        assert!(matches!(result, Err(Error::ExtractionError(_))));
        assert!(!temp_dir.path().join("escaped").exists());

        journal.rollback();
        assert!(!config.root.join("usr").exists());
    }

    #[test]
    fn test_extract_manifests_hard_links() {
        let (temp_dir, config) = setup();
        let path = temp_dir.path().join("foo.tar.gz");
        write_package(
            &path,
            None,
            &[
                TestEntry::File("usr/bin/foo", b"bin"),
                TestEntry::HardLink("usr/bin/foo-alias", "usr/bin/foo"),
            ],
        );

        let archive = PackageArchive::open(&path).unwrap();
        let mut journal = Journal::new();
        let manifest = Extractor::new(&config).extract(&archive, &mut journal).unwrap();

        assert_eq!(
            manifest.paths(),
            &["/usr/bin/foo".to_string(), "/usr/bin/foo-alias".to_string()]
        );
        assert_eq!(fs::read(config.root.join("usr/bin/foo-alias")).unwrap(), b"bin");
        journal.commit();
    }

    #[test]
    fn test_extract_refuses_hard_link_to_metadata() {
        let (temp_dir, config) = setup();
        let path = temp_dir.path().join("evil.tar.gz");
        write_package(
            &path,
            Some("name=evil\n"),
            &[TestEntry::HardLink("usr/bin/info", "PKGINFO")],
        );

        let archive = PackageArchive::open(&path).unwrap();
        let mut journal = Journal::new();
        let result = Extractor::new(&config).extract(&archive, &mut journal);
        assert!(matches!(result, Err(Error::ExtractionError(_))));
        assert!(!config.root.join("usr/bin/info").exists());
        journal.rollback();
    }

    #[test]
    fn test_extract_package_persists_manifest() {
        let (temp_dir, config) = setup();
        let index = PackageIndex::open(&config).unwrap();
        let path = temp_dir.path().join("foo.tar.gz");
        write_package(&path, None, &[TestEntry::File("usr/lib/libfoo.so", b"elf")]);

        let archive = PackageArchive::open(&path).unwrap();
        let mut journal = Journal::new();
        let manifest =
            extract_package(&Extractor::new(&config), &index, "foo", &archive, &mut journal).unwrap();

        assert_eq!(index.read_manifest("foo").unwrap(), Some(manifest));
    }

    #[test]
    fn test_missing_ancestors() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("usr")).unwrap();

        let missing = missing_ancestors(root, &root.join("usr/share/foo/file"));
        assert_eq!(missing, vec![root.join("usr/share"), root.join("usr/share/foo")]);
        assert!(missing_ancestors(root, &root.join("file")).is_empty());
    }
}
