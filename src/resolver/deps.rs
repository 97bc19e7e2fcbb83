// src/resolver/deps.rs

//! Dependency verification
//!
//! Only presence is checked: a dependency is met when an installed record
//! with that exact name exists. There is no version solving.

use crate::db::PackageIndex;
use crate::error::{Error, Result};
use crate::packages::descriptor::split_dependencies;
use tracing::{info, warn};

/// Which declared dependencies are installed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencyReport {
    pub satisfied: Vec<String>,
    pub missing: Vec<String>,
}

impl DependencyReport {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Check each dependency in a comma-separated list against the index
pub fn check_dependencies(index: &PackageIndex, depends: &str) -> DependencyReport {
    let mut report = DependencyReport::default();

    for dep in split_dependencies(depends) {
        if index.is_installed(dep) {
            info!("Dependency '{}' is installed", dep);
            report.satisfied.push(dep.to_string());
        } else {
            warn!("Dependency '{}' is missing", dep);
            report.missing.push(dep.to_string());
        }
    }

    report
}

/// Verify that every dependency of `package` is installed
///
/// An empty list always succeeds. Fails with `MissingDependency` naming the
/// unmet dependencies otherwise.
pub fn verify_dependencies(
    index: &PackageIndex,
    package: &str,
    depends: &str,
) -> Result<DependencyReport> {
    let report = check_dependencies(index, depends);

    if report.is_satisfied() {
        Ok(report)
    } else {
        warn!("{} dependencies are missing for {}", report.missing.len(), package);
        Err(Error::MissingDependency {
            package: package.to_string(),
            missing: report.missing,
        })
    }
}
