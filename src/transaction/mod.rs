// src/transaction/mod.rs

//! Transaction orchestration
//!
//! The `Orchestrator` is the only writer of the package index. It turns a
//! `Command` into one pass through the install, update, remove, or ghost
//! install pipeline:
//!
//! ```text
//! Fetching -> Parsing -> VerifyingDeps -> CheckingConflicts -> Extracting -> Recording -> Done
//! ```
//!
//! The first failing step aborts the rest. Failures while extracting or
//! recording roll back every path the transaction created and restore the
//! package's previous manifest. Each executed command holds the index lock
//! for its whole duration and leaves one entry in the action history.

pub mod state;

pub use state::{Transaction, TransactionState};

use crate::config::Config;
use crate::db::PackageIndex;
use crate::db::history::{self, HistoryEntry, HistoryStatus};
use crate::db::lock::IndexLock;
use crate::db::models::{FileManifest, InstalledPackage};
use crate::error::{Error, Result};
use crate::filesystem::extract::{Extractor, extract_package};
use crate::filesystem::journal::Journal;
use crate::filesystem::resolve;
use crate::packages::archive::{EntryTarget, METADATA_ENTRY, PackageArchive};
use crate::packages::descriptor::{PackageDescriptor, validate_name};
use crate::repository::{Catalog, PackageFetcher, RepositoryClient, sync_repository};
use crate::resolver::{check_conflicts, verify_dependencies};
use chrono::Utc;
use rusqlite::Connection;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Package whose archive carries the tool itself
const SELF_PACKAGE: &str = "mpkg";

/// Binary entry replaced by self-update
const SELF_BINARY: &str = "mpkg";

/// Index-mutating commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Install(String),
    Update(String),
    Remove(String),
    /// Extract and manifest without writing an installed record
    GhostInstall(String),
}

impl Command {
    /// History action name
    pub fn action(&self) -> &str {
        match self {
            Command::Install(_) => "install",
            Command::Update(_) => "update",
            Command::Remove(_) => "remove",
            Command::GhostInstall(_) => "ghost",
        }
    }

    /// Package the command operates on
    pub fn target(&self) -> &str {
        match self {
            Command::Install(name)
            | Command::Update(name)
            | Command::Remove(name)
            | Command::GhostInstall(name) => name,
        }
    }
}

/// Result of removing a package's files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub package: String,
    pub removed: usize,
    pub failed: usize,
}

/// What a successful command did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Installed { name: String, version: String },
    AlreadyInstalled(String),
    Updated { name: String, from: String, to: String },
    UpToDate { name: String, version: String },
    Removed(RemovalReport),
    GhostInstalled { name: String, files: usize },
    Synced { packages: usize },
    SelfUpdated { version: String },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Installed { name, version } => {
                write!(f, "Installed {}", versioned(name, version))
            }
            Outcome::AlreadyInstalled(name) => write!(f, "{} is already installed", name),
            Outcome::Updated { name, from, to } => {
                write!(f, "Updated {} from {} to {}", name, or_unknown(from), or_unknown(to))
            }
            Outcome::UpToDate { name, version } => {
                write!(f, "{} is up to date", versioned(name, version))
            }
            Outcome::Removed(report) => write!(
                f,
                "Removed {} ({} files deleted, {} failed)",
                report.package, report.removed, report.failed
            ),
            Outcome::GhostInstalled { name, files } => {
                write!(f, "Ghost-installed {} ({} files, no record)", name, files)
            }
            Outcome::Synced { packages } => {
                write!(f, "Repository synced: {} packages available", packages)
            }
            Outcome::SelfUpdated { version } => {
                write!(f, "{} updated to {}", SELF_PACKAGE, or_unknown(version))
            }
        }
    }
}

fn versioned(name: &str, version: &str) -> String {
    if version.is_empty() {
        name.to_string()
    } else {
        format!("{} {}", name, version)
    }
}

fn or_unknown(version: &str) -> &str {
    if version.is_empty() { "unknown" } else { version }
}

/// Outcome of a multi-package operation
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<Outcome>,
    pub failures: Vec<(String, Error)>,
}

impl BatchReport {
    /// Number of packages that failed
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Install,
    Ghost,
    Update,
}

/// What the install pipeline produced
struct Applied {
    descriptor: PackageDescriptor,
    manifest: FileManifest,
    /// Manifest stored before this transaction, if any
    previous: Option<FileManifest>,
}

/// Drives package transactions against the index
pub struct Orchestrator<F: PackageFetcher> {
    config: Config,
    index: PackageIndex,
    extractor: Extractor,
    fetcher: F,
    history: Connection,
}

impl<F: PackageFetcher> Orchestrator<F> {
    /// Open the index and action history described by `config`
    pub fn new(config: &Config, fetcher: F) -> Result<Self> {
        config.ensure_dirs()?;
        let index = PackageIndex::open(config)?;
        let history = history::open(&config.history_path())?;

        Ok(Self {
            config: config.clone(),
            index,
            extractor: Extractor::new(config),
            fetcher,
            history,
        })
    }

    pub fn index(&self) -> &PackageIndex {
        &self.index
    }

    /// Action history database
    pub fn history(&self) -> &Connection {
        &self.history
    }

    /// Run one command under the index lock and record it in the history
    pub fn execute(&self, command: &Command) -> Result<Outcome> {
        let _lock = IndexLock::acquire(&self.config.lock_path())?;
        info!("Running {} {}", command.action(), command.target());

        let mut txn = Transaction::new(command.target());
        let result = match command {
            Command::Install(name) => self.install(&mut txn, name, Mode::Install),
            Command::GhostInstall(name) => self.install(&mut txn, name, Mode::Ghost),
            Command::Update(name) => self.update(&mut txn, name),
            Command::Remove(name) => self.remove(name),
        };

        let failed_in = result.as_ref().err().map(|e| txn.fail(e));
        self.record(command.action(), command.target(), &result, failed_in);
        result
    }

    /// Install each package in order, continuing past failures
    pub fn install_many(&self, names: &[String]) -> BatchReport {
        self.run_batch(names.iter().map(|name| Command::Install(name.clone())))
    }

    /// Remove every installed package not in the protected set
    pub fn clean_aggressive(&self) -> Result<BatchReport> {
        let targets: Vec<String> = self
            .index
            .installed_names()?
            .into_iter()
            .filter(|name| {
                let protected = self.config.protected.iter().any(|p| p == name);
                if protected {
                    info!("Keeping protected package {}", name);
                }
                !protected
            })
            .collect();

        info!("Aggressive clean will remove {} packages", targets.len());
        Ok(self.run_batch(targets.into_iter().map(Command::Remove)))
    }

    /// Download the repository catalog into the index
    pub fn sync_catalog(&self, client: &RepositoryClient) -> Result<Outcome> {
        let _lock = IndexLock::acquire(&self.config.lock_path())?;
        let result = sync_repository(client, &self.config).map(|packages| Outcome::Synced { packages });
        self.record("sync", &self.config.repo_url, &result, None);
        result
    }

    /// Replace the running binary with the one from the latest `mpkg` archive
    ///
    /// The index is not touched.
    pub fn self_update(&self) -> Result<Outcome> {
        let result = self.replace_self();
        self.record("self-update", SELF_PACKAGE, &result, None);
        result
    }

    fn run_batch(&self, commands: impl Iterator<Item = Command>) -> BatchReport {
        let mut report = BatchReport::default();
        for command in commands {
            match self.execute(&command) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    warn!("{} {} failed: {}", command.action(), command.target(), e);
                    report.failures.push((command.target().to_string(), e));
                }
            }
        }
        report
    }

    fn install(&self, txn: &mut Transaction, name: &str, mode: Mode) -> Result<Outcome> {
        validate_name(name)?;
        if self.index.is_installed(name) {
            info!("{} is already installed", name);
            return Ok(Outcome::AlreadyInstalled(name.to_string()));
        }

        let applied = self.apply(txn, name, mode)?;
        Ok(match mode {
            Mode::Ghost => Outcome::GhostInstalled {
                name: name.to_string(),
                files: applied.manifest.len(),
            },
            _ => Outcome::Installed {
                name: name.to_string(),
                version: applied.descriptor.version,
            },
        })
    }

    fn update(&self, txn: &mut Transaction, name: &str) -> Result<Outcome> {
        validate_name(name)?;
        let record = self
            .index
            .read_record(name)?
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;

        let catalog_path = self.config.catalog_path();
        if !catalog_path.exists() {
            warn!("No repository catalog at {}, run 'mpkg update' first", catalog_path.display());
            return Err(Error::NotInCatalog(name.to_string()));
        }
        let catalog = Catalog::load(&catalog_path)?;
        let available = catalog
            .version_of(name)
            .ok_or_else(|| Error::NotInCatalog(name.to_string()))?;

        let installed = record.descriptor.version;
        if installed == available {
            info!("{} {} is already the latest version", name, installed);
            return Ok(Outcome::UpToDate {
                name: name.to_string(),
                version: installed,
            });
        }

        info!("Updating {} from {} to {}", name, or_unknown(&installed), available);
        let applied = self.apply(txn, name, Mode::Update)?;
        self.remove_stale(name, applied.previous.as_ref(), &applied.manifest);

        Ok(Outcome::Updated {
            name: name.to_string(),
            from: installed,
            to: applied.descriptor.version,
        })
    }

    /// Fetch, check, extract, and record one package
    fn apply(&self, txn: &mut Transaction, name: &str, mode: Mode) -> Result<Applied> {
        txn.advance(TransactionState::Fetching);
        let path = self.fetcher.fetch(name)?;
        let archive = PackageArchive::open(&path)?;

        txn.advance(TransactionState::Parsing);
        let descriptor = match archive.read_descriptor()? {
            Some(descriptor) if descriptor.name.is_empty() => PackageDescriptor {
                name: name.to_string(),
                ..descriptor
            },
            Some(descriptor) if descriptor.name != name => {
                return Err(Error::ParseError(format!(
                    "Archive for '{}' describes package '{}'",
                    name, descriptor.name
                )));
            }
            Some(descriptor) => descriptor,
            None if mode == Mode::Update => {
                return Err(Error::ParseError(format!(
                    "Archive for '{}' has no {} entry",
                    name, METADATA_ENTRY
                )));
            }
            None => {
                warn!("No {} entry in {}, installing as '{}'", METADATA_ENTRY, path.display(), name);
                PackageDescriptor::named(name)
            }
        };

        if descriptor.has_dependencies() {
            txn.advance(TransactionState::VerifyingDeps);
            verify_dependencies(&self.index, name, &descriptor.depends)?;
        }

        txn.advance(TransactionState::CheckingConflicts);
        let candidate = archive.file_manifest()?;
        check_conflicts(&self.index, name, Some(&candidate))?;

        let previous = self.index.read_manifest(name)?;
        let mut journal = Journal::new();

        txn.advance(TransactionState::Extracting);
        let manifest = match extract_package(&self.extractor, &self.index, name, &archive, &mut journal) {
            Ok(manifest) => manifest,
            Err(e) => {
                self.roll_back(name, journal, previous.as_ref());
                return Err(e);
            }
        };

        if mode != Mode::Ghost {
            txn.advance(TransactionState::Recording);
            let record = InstalledPackage::new(descriptor.clone(), Utc::now().timestamp());
            if let Err(e) = self.index.write_record(&record) {
                self.roll_back(name, journal, previous.as_ref());
                return Err(e);
            }
        }

        journal.commit();
        txn.advance(TransactionState::Done);
        Ok(Applied {
            descriptor,
            manifest,
            previous,
        })
    }

    /// Undo a failed extraction and put the previous manifest back
    fn roll_back(&self, name: &str, journal: Journal, previous: Option<&FileManifest>) {
        let report = journal.rollback();
        warn!(
            "Rolled back {}: {} paths removed, {} kept, {} failed (overwritten files are not restored)",
            name, report.removed, report.kept, report.failed
        );

        let restored = match previous {
            Some(manifest) => self.index.write_manifest(name, manifest),
            None => self.index.delete_manifest(name).map(|_| ()),
        };
        if let Err(e) = restored {
            warn!("Failed to restore manifest for {}: {}", name, e);
        }
    }

    /// Delete paths the previous version owned that the new one doesn't
    fn remove_stale(&self, name: &str, previous: Option<&FileManifest>, current: &FileManifest) {
        let Some(previous) = previous else {
            return;
        };

        for path in previous.iter().filter(|path| !current.contains(path)) {
            let target = resolve(self.extractor.root(), path);
            match fs::remove_file(&target) {
                Ok(()) => debug!("Removed stale file {}", target.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove stale file {} of {}: {}", target.display(), name, e),
            }
        }
    }

    fn remove(&self, name: &str) -> Result<Outcome> {
        validate_name(name)?;
        if !self.index.is_installed(name) {
            return Err(Error::NotInstalled(name.to_string()));
        }

        let mut report = RemovalReport {
            package: name.to_string(),
            ..RemovalReport::default()
        };

        match self.index.read_manifest(name)? {
            Some(manifest) => {
                for path in manifest.iter() {
                    let target = resolve(self.extractor.root(), path);
                    match fs::remove_file(&target) {
                        Ok(()) => {
                            debug!("Deleted {}", target.display());
                            report.removed += 1;
                        }
                        Err(e) => {
                            warn!("Failed to delete {}: {}", target.display(), e);
                            report.failed += 1;
                        }
                    }
                }
            }
            None => warn!("{} has no file manifest, removing record only", name),
        }

        self.index.delete_manifest(name)?;
        self.index.delete_record(name)?;

        info!(
            "Removed {}: {} files deleted, {} failed",
            name, report.removed, report.failed
        );
        Ok(Outcome::Removed(report))
    }

    fn replace_self(&self) -> Result<Outcome> {
        let path = self.fetcher.fetch(SELF_PACKAGE)?;
        let archive = PackageArchive::open(&path)?;
        let descriptor = archive.read_descriptor()?.ok_or_else(|| {
            Error::ParseError(format!(
                "{} archive has no {} entry",
                SELF_PACKAGE, METADATA_ENTRY
            ))
        })?;

        install_binary(&archive, &self.config.self_path)?;
        info!("Replaced {}", self.config.self_path.display());

        Ok(Outcome::SelfUpdated {
            version: descriptor.version,
        })
    }

    fn record(
        &self,
        action: &str,
        target: &str,
        result: &Result<Outcome>,
        failed_in: Option<TransactionState>,
    ) {
        let mut entry = match result {
            Ok(outcome) => {
                HistoryEntry::new(action, target, HistoryStatus::Success).with_message(outcome.to_string())
            }
            Err(e) => {
                let message = match failed_in {
                    Some(state) if state != TransactionState::Pending => {
                        format!("failed while {}: {}", state, e)
                    }
                    _ => e.to_string(),
                };
                HistoryEntry::new(action, target, HistoryStatus::Failed).with_message(message)
            }
        };

        if let Err(e) = entry.insert(&self.history) {
            warn!("Failed to record {} {} in history: {}", action, target, e);
        }
    }
}

/// Copy the archive's `mpkg` binary over `dest`
///
/// The binary is written beside `dest`, made executable, then renamed over
/// it, so `dest` is always either the old or the new binary.
fn install_binary(archive: &PackageArchive, dest: &Path) -> Result<()> {
    let mut tar = archive.tar()?;
    let entries = tar
        .entries()
        .map_err(|e| Error::ExtractionError(format!("Failed to read archive entries: {}", e)))?;

    for entry in entries {
        let mut entry = entry
            .map_err(|e| Error::ExtractionError(format!("Failed to read archive entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let raw_path = entry
            .path()
            .map_err(|e| Error::ExtractionError(format!("Failed to get entry path: {}", e)))?
            .into_owned();
        let EntryTarget::Payload(relative) = EntryTarget::classify(&raw_path)? else {
            continue;
        };
        if relative.file_name() != Some(OsStr::new(SELF_BINARY)) {
            continue;
        }

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |e: io::Error| {
            Error::IoError(format!("Failed to replace {}: {}", dest.display(), e))
        };

        fs::create_dir_all(parent).map_err(io_err)?;
        let mut temp = NamedTempFile::new_in(parent).map_err(io_err)?;
        io::copy(&mut entry, &mut temp).map_err(io_err)?;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o755))
            .map_err(io_err)?;
        temp.persist(dest).map_err(|e| io_err(e.error))?;
        return Ok(());
    }

    Err(Error::ExtractionError(format!(
        "Archive {} has no '{}' binary",
        archive.path().display(),
        SELF_BINARY
    )))
}
