// src/resolver/conflicts.rs

//! File ownership conflict detection
//!
//! Runs before extraction: a package may not install a path that appears in
//! any other package's manifest. Manifests without an installed record
//! (ghost installs) still claim their paths.

use crate::db::PackageIndex;
use crate::db::models::FileManifest;
use crate::error::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Check `package`'s paths against every other package's manifest
///
/// `candidate` is the manifest the package is about to install. Without one,
/// the manifest already stored for `package` (left by an earlier partial
/// operation) is checked; if there is none, there is nothing to conflict.
/// The first shared path fails with `Conflict`.
pub fn check_conflicts(
    index: &PackageIndex,
    package: &str,
    candidate: Option<&FileManifest>,
) -> Result<()> {
    let stored;
    let own = match candidate {
        Some(manifest) => manifest,
        None => match index.read_manifest(package)? {
            Some(manifest) => {
                stored = manifest;
                &stored
            }
            None => {
                debug!("No manifest for {}, nothing to check", package);
                return Ok(());
            }
        },
    };

    if own.is_empty() {
        return Ok(());
    }

    for other in index.manifest_names()? {
        if other == package {
            continue;
        }
        let Some(other_manifest) = index.read_manifest(&other)? else {
            continue;
        };
        let owned: HashSet<&str> = other_manifest.iter().collect();

        if let Some(path) = own.iter().find(|path| owned.contains(path)) {
            warn!("Conflict: {} already owned by {}", path, other);
            return Err(Error::Conflict {
                path: path.to_string(),
                owner: other,
            });
        }
    }

    debug!("No conflicts for {} ({} paths)", package, own.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(paths: &[&str]) -> FileManifest {
        paths.iter().map(|p| p.to_string()).collect()
    }

    fn setup() -> (tempfile::TempDir, PackageIndex) {
        let temp_dir = tempfile::tempdir().unwrap();
        let index = PackageIndex::at(temp_dir.path()).unwrap();
        index
            .write_manifest("bar", &manifest(&["/usr/bin/bar", "/usr/lib/libshared.so"]))
            .unwrap();
        (temp_dir, index)
    }

    #[test]
    fn test_no_conflict() {
        let (_temp, index) = setup();
        let candidate = manifest(&["/usr/bin/foo"]);
        assert!(check_conflicts(&index, "foo", Some(&candidate)).is_ok());
    }

    #[test]
    fn test_conflict_names_path_and_owner() {
        let (_temp, index) = setup();
        let candidate = manifest(&["/usr/bin/foo", "/usr/lib/libshared.so"]);

        match check_conflicts(&index, "foo", Some(&candidate)) {
            Err(Error::Conflict { path, owner }) => {
                assert_eq!(path, "/usr/lib/libshared.so");
                assert_eq!(owner, "bar");
            }
            other => panic!("expected Conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_own_manifest_is_excluded() {
        let (_temp, index) = setup();
        // Reinstalling bar over its own files is fine
        let candidate = manifest(&["/usr/bin/bar"]);
        assert!(check_conflicts(&index, "bar", Some(&candidate)).is_ok());
    }

    #[test]
    fn test_exclusion_is_exact_not_substring() {
        let (_temp, index) = setup();
        // "bar-utils" must still be compared against "bar"
        let candidate = manifest(&["/usr/bin/bar"]);
        assert!(matches!(
            check_conflicts(&index, "bar-utils", Some(&candidate)),
            Err(Error::Conflict { .. })
        ));
    }

    #[test]
    fn test_stored_manifest_used_without_candidate() {
        let (_temp, index) = setup();
        assert!(check_conflicts(&index, "foo", None).is_ok());

        index.write_manifest("foo", &manifest(&["/usr/bin/bar"])).unwrap();
        assert!(matches!(
            check_conflicts(&index, "foo", None),
            Err(Error::Conflict { .. })
        ));
    }
}
