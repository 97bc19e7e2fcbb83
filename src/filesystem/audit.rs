// src/filesystem/audit.rs

//! Filesystem auditor
//!
//! Walks every manifest in the index and reports owned paths that are gone
//! from disk, plus manifests that have no installed record behind them
//! (ghost installs and installs interrupted before recording). Nothing is
//! repaired.

use crate::db::PackageIndex;
use crate::error::Result;
use crate::filesystem::resolve;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// An owned path that no longer exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingFile {
    pub package: String,
    pub path: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditReport {
    pub packages_checked: usize,
    pub paths_checked: usize,
    pub missing: Vec<MissingFile>,
    /// Packages with a manifest but no installed record
    pub orphaned_manifests: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.orphaned_manifests.is_empty()
    }
}

/// Check every manifested path beneath `root`
pub fn audit(index: &PackageIndex, root: &Path) -> Result<AuditReport> {
    let mut report = AuditReport::default();

    for name in index.manifest_names()? {
        let Some(manifest) = index.read_manifest(&name)? else {
            continue;
        };
        report.packages_checked += 1;

        if !index.is_installed(&name) {
            debug!("Manifest for {} has no installed record", name);
            report.orphaned_manifests.push(name.clone());
        }

        for path in manifest.iter() {
            report.paths_checked += 1;
            // A dangling symlink still counts as present
            if fs::symlink_metadata(resolve(root, path)).is_err() {
                warn!("Missing file: {} (owned by {})", path, name);
                report.missing.push(MissingFile {
                    package: name.clone(),
                    path: path.to_string(),
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{FileManifest, InstalledPackage};
    use crate::packages::PackageDescriptor;

    #[test]
    fn test_audit_reports_missing_and_orphans() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        fs::write(root.join("usr/bin/foo"), b"x").unwrap();

        let index = PackageIndex::at(&temp_dir.path().join("db")).unwrap();
        index
            .write_record(&InstalledPackage::new(PackageDescriptor::named("foo"), 0))
            .unwrap();
        let manifest: FileManifest = ["/usr/bin/foo".to_string(), "/usr/bin/foo-helper".to_string()]
            .into_iter()
            .collect();
        index.write_manifest("foo", &manifest).unwrap();

        let ghost: FileManifest = ["/usr/bin/ghost".to_string()].into_iter().collect();
        index.write_manifest("ghost", &ghost).unwrap();

        let report = audit(&index, &root).unwrap();
        assert_eq!(report.packages_checked, 2);
        assert_eq!(report.paths_checked, 3);
        assert_eq!(
            report.missing,
            vec![
                MissingFile {
                    package: "foo".to_string(),
                    path: "/usr/bin/foo-helper".to_string()
                },
                MissingFile {
                    package: "ghost".to_string(),
                    path: "/usr/bin/ghost".to_string()
                },
            ]
        );
        assert_eq!(report.orphaned_manifests, vec!["ghost".to_string()]);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_audit_empty_index_is_clean() {
        let temp_dir = tempfile::tempdir().unwrap();
        let index = PackageIndex::at(temp_dir.path()).unwrap();
        let report = audit(&index, temp_dir.path()).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.packages_checked, 0);
    }
}
