// src/filesystem/mod.rs

//! Filesystem side of package management
//!
//! - `extract`: unpacking archives onto the install root
//! - `journal`: undoing a partially applied transaction
//! - `audit`: checking that manifested files still exist

pub mod audit;
pub mod extract;
pub mod journal;

use std::path::{Path, PathBuf};

/// Host location of an absolute manifest path under the install root
///
/// With the default root `/` this is the manifest path itself.
pub fn resolve(root: &Path, manifest_path: &str) -> PathBuf {
    root.join(manifest_path.trim_start_matches('/'))
}
