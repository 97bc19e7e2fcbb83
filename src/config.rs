// src/config.rs

//! Runtime configuration
//!
//! A `Config` is built once at startup (defaults, then the configuration
//! file, then command-line overrides) and handed by reference to every
//! component. Nothing mutates it afterwards.

use crate::error::{Error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/mpkg.conf";

/// Default package index directory
pub const DEFAULT_DB_PATH: &str = "/var/db/mpkg";

/// Default archive download cache
pub const DEFAULT_CACHE_PATH: &str = "/var/cache/mpkg";

/// Default remote repository
pub const DEFAULT_REPO_URL: &str = "https://loxsete.github.io/mpkg-server/";

/// Default location of the running binary, replaced by self-update
pub const DEFAULT_SELF_PATH: &str = "/bin/mpkg";

/// Packages that `clean --aggressive` never removes
pub const DEFAULT_PROTECTED: &[&str] = &["mpkg", "busybox"];

const CATALOG_FILE: &str = "repo.db";
const HISTORY_FILE: &str = "history.sqlite";
const LOCK_FILE: &str = ".lock";

/// Immutable configuration shared by all components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding records, manifests, the catalog, and the history
    pub db_dir: PathBuf,
    /// Directory where fetched archives are stored
    pub cache_dir: PathBuf,
    /// Filesystem root packages are installed under
    pub root: PathBuf,
    /// Base URL of the remote repository
    pub repo_url: String,
    /// Binary replaced by self-update
    pub self_path: PathBuf,
    /// Restore archive uid/gid on extracted entries (requires root)
    pub preserve_ownership: bool,
    /// Packages exempt from aggressive cleaning
    pub protected: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from(DEFAULT_DB_PATH),
            cache_dir: PathBuf::from(DEFAULT_CACHE_PATH),
            root: PathBuf::from("/"),
            repo_url: DEFAULT_REPO_URL.to_string(),
            self_path: PathBuf::from(DEFAULT_SELF_PATH),
            preserve_ownership: true,
            protected: DEFAULT_PROTECTED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    /// Load configuration from a `KEY = VALUE` file on top of the defaults
    ///
    /// A missing file is not an error; the defaults are returned unchanged.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No configuration file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::InitError(format!(
                    "Failed to read configuration {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        Self::parse(&content)
    }

    /// Parse configuration file content on top of the defaults
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                warn!("Ignoring malformed configuration line {}: {}", lineno + 1, line);
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            match key {
                "PKG_DB_PATH" => config.db_dir = PathBuf::from(value),
                "PKG_CACHE_PATH" => config.cache_dir = PathBuf::from(value),
                "PKG_REPO_URL" => config.repo_url = value.to_string(),
                "PKG_ROOT" => config.root = PathBuf::from(value),
                "PKG_SELF_PATH" => config.self_path = PathBuf::from(value),
                "PKG_PRESERVE_OWNERSHIP" => {
                    config.preserve_ownership = parse_bool(value).ok_or_else(|| {
                        Error::InitError(format!(
                            "PKG_PRESERVE_OWNERSHIP expects a boolean, got '{}'",
                            value
                        ))
                    })?;
                }
                "PKG_PROTECTED" => {
                    config.protected = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => warn!("Unknown configuration key: {}", key),
            }
        }

        Ok(config)
    }

    /// Configuration with every path placed beneath `base`
    ///
    /// Used for sandboxed installs and tests: the index lives in
    /// `base/db`, the cache in `base/cache`, and packages are installed
    /// under `base/root`.
    pub fn rooted_at(base: &Path) -> Self {
        Self {
            db_dir: base.join("db"),
            cache_dir: base.join("cache"),
            root: base.join("root"),
            self_path: base.join("root/bin/mpkg"),
            preserve_ownership: false,
            ..Self::default()
        }
    }

    /// Repository descriptor cache written by sync
    pub fn catalog_path(&self) -> PathBuf {
        self.db_dir.join(CATALOG_FILE)
    }

    /// SQLite action history
    pub fn history_path(&self) -> PathBuf {
        self.db_dir.join(HISTORY_FILE)
    }

    /// Advisory lock file guarding the index
    pub fn lock_path(&self) -> PathBuf {
        self.db_dir.join(LOCK_FILE)
    }

    /// Create the index and cache directories if they don't exist
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.db_dir, &self.cache_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                Error::InitError(format!("Failed to create directory {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
