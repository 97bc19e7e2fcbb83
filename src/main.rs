// src/main.rs

use anyhow::{Result, bail};
use chrono::DateTime;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use mpkg::Config;
use mpkg::config::DEFAULT_CONFIG_PATH;
use mpkg::db::PackageIndex;
use mpkg::db::history::{self, HistoryEntry};
use mpkg::filesystem::audit::audit;
use mpkg::packages::PackageDescriptor;
use mpkg::repository::{Catalog, HttpFetcher, LocalFetcher, PackageFetcher, RepositoryClient};
use mpkg::transaction::{Command, Orchestrator, Outcome};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use tracing::info;

/// Files listed by `info` before truncating
const INFO_FILE_LIMIT: usize = 10;

#[derive(Parser)]
#[command(name = "mpkg")]
#[command(author, version, about = "Minimal package manager with conflict detection and precise removal", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Package index directory (overrides PKG_DB_PATH)
    #[arg(long, global = true, value_name = "DIR")]
    db_path: Option<PathBuf>,

    /// Download cache directory (overrides PKG_CACHE_PATH)
    #[arg(long, global = true, value_name = "DIR")]
    cache_path: Option<PathBuf>,

    /// Install root directory (overrides PKG_ROOT)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Repository URL (overrides PKG_REPO_URL)
    #[arg(long, global = true, value_name = "URL")]
    repo_url: Option<String>,

    /// Read package archives from a local directory instead of the repository
    #[arg(long, global = true, value_name = "DIR")]
    local_repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Install one or more packages
    Install {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Remove an installed package and its files
    Remove {
        /// Package name to remove
        package: String,
    },
    /// List installed packages
    List,
    /// Show details of an installed package
    Info {
        /// Package name
        package: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update a package, or sync the repository catalog when no package is given
    Update {
        /// Package name (syncs the catalog if omitted)
        package: Option<String>,
    },
    /// Search installed packages and the repository catalog
    Search {
        /// Substring to match against package names
        query: String,
    },
    /// Extract a package's files without recording it as installed
    Ghost {
        /// Package name
        package: String,
    },
    /// Replace the mpkg binary with the latest release
    SelfUpdate,
    /// Show installed package statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove installed packages
    Clean {
        /// Remove every package except the protected ones
        #[arg(long)]
        aggressive: bool,
    },
    /// Check that every manifested file still exists
    Doctor,
    /// Show recent actions
    History {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

/// Build the configuration: defaults, then the file, then flags
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config)?;

    if let Some(db_path) = &cli.db_path {
        config.db_dir = db_path.clone();
    }
    if let Some(cache_path) = &cli.cache_path {
        config.cache_dir = cache_path.clone();
    }
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(repo_url) = &cli.repo_url {
        config.repo_url = repo_url.clone();
    }

    Ok(config)
}

fn orchestrator(cli: &Cli, config: &Config) -> Result<Orchestrator<Box<dyn PackageFetcher>>> {
    let fetcher: Box<dyn PackageFetcher> = match &cli.local_repo {
        Some(dir) => {
            info!("Using local repository {}", dir.display());
            Box::new(LocalFetcher::new(dir))
        }
        None => Box::new(HttpFetcher::new(config)?),
    };
    Ok(Orchestrator::new(config, fetcher)?)
}

#[derive(Serialize)]
struct PackageInfo<'a> {
    #[serde(flatten)]
    descriptor: &'a PackageDescriptor,
    install_time: i64,
    installed_at: String,
    files: Vec<&'a str>,
}

fn format_timestamp(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}

fn print_outcome(outcome: &Outcome) {
    println!("{}", outcome);
    if let Outcome::Removed(report) = outcome {
        if report.failed > 0 {
            println!("  Warning: {} file(s) could not be deleted", report.failed);
        }
    }
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let Some(command) = &cli.command else {
        // No command provided, show help
        println!("mpkg v{}", env!("CARGO_PKG_VERSION"));
        println!("Run 'mpkg --help' for usage information");
        return Ok(());
    };

    if let Commands::Completions { shell } = command {
        clap_complete::generate(*shell, &mut Cli::command(), "mpkg", &mut io::stdout());
        return Ok(());
    }

    let config = load_config(&cli)?;

    match command {
        Commands::Install { packages } => {
            let orchestrator = orchestrator(&cli, &config)?;
            if let [package] = packages.as_slice() {
                print_outcome(&orchestrator.execute(&Command::Install(package.clone()))?);
                return Ok(());
            }

            let report = orchestrator.install_many(packages);
            for outcome in &report.outcomes {
                print_outcome(outcome);
            }
            for (package, error) in &report.failures {
                println!("Failed to install {}: {}", package, error);
            }
            if report.failed() > 0 {
                bail!("{} of {} packages failed to install", report.failed(), packages.len());
            }
            Ok(())
        }
        Commands::Remove { package } => {
            let orchestrator = orchestrator(&cli, &config)?;
            print_outcome(&orchestrator.execute(&Command::Remove(package.clone()))?);
            Ok(())
        }
        Commands::Ghost { package } => {
            let orchestrator = orchestrator(&cli, &config)?;
            print_outcome(&orchestrator.execute(&Command::GhostInstall(package.clone()))?);
            Ok(())
        }
        Commands::Update { package } => {
            let orchestrator = orchestrator(&cli, &config)?;
            let outcome = match package {
                Some(package) => orchestrator.execute(&Command::Update(package.clone()))?,
                None => orchestrator.sync_catalog(&RepositoryClient::new()?)?,
            };
            print_outcome(&outcome);
            Ok(())
        }
        Commands::SelfUpdate => {
            let orchestrator = orchestrator(&cli, &config)?;
            print_outcome(&orchestrator.self_update()?);
            Ok(())
        }
        Commands::Clean { aggressive } => {
            if !aggressive {
                bail!("Refusing to clean without --aggressive");
            }
            let orchestrator = orchestrator(&cli, &config)?;
            let report = orchestrator.clean_aggressive()?;
            for outcome in &report.outcomes {
                print_outcome(outcome);
            }
            for (package, error) in &report.failures {
                println!("Failed to remove {}: {}", package, error);
            }
            println!("\nRemoved {} package(s)", report.outcomes.len());
            if report.failed() > 0 {
                bail!("{} package(s) could not be removed", report.failed());
            }
            Ok(())
        }
        Commands::List => {
            let index = PackageIndex::open(&config)?;
            let records = index.records()?;

            if records.is_empty() {
                println!("No packages installed.");
            } else {
                println!("Installed packages:");
                for record in &records {
                    print!("  {} {}", record.name(), record.descriptor.version);
                    if !record.descriptor.arch.is_empty() {
                        print!(" [{}]", record.descriptor.arch);
                    }
                    println!();
                }
                println!("\nTotal: {} package(s)", records.len());
            }
            Ok(())
        }
        Commands::Info { package, json } => {
            let index = PackageIndex::open(&config)?;
            let record = index
                .read_record(package)?
                .ok_or_else(|| mpkg::Error::NotInstalled(package.clone()))?;
            let manifest = index.read_manifest(package)?.unwrap_or_default();

            if *json {
                let info = PackageInfo {
                    descriptor: &record.descriptor,
                    install_time: record.install_time,
                    installed_at: format_timestamp(record.install_time),
                    files: manifest.iter().collect(),
                };
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }

            let descriptor = &record.descriptor;
            println!("Name:         {}", descriptor.name);
            println!("Version:      {}", descriptor.version);
            println!("Architecture: {}", descriptor.arch);
            println!("Depends:      {}", descriptor.depends);
            println!("Size:         {}", format_size(descriptor.size));
            println!("Installed:    {}", format_timestamp(record.install_time));
            println!("Description:  {}", descriptor.description);
            println!("Files:        {}", manifest.len());
            for path in manifest.iter().take(INFO_FILE_LIMIT) {
                println!("  {}", path);
            }
            if manifest.len() > INFO_FILE_LIMIT {
                println!("  ... and {} more", manifest.len() - INFO_FILE_LIMIT);
            }
            Ok(())
        }
        Commands::Search { query } => {
            let index = PackageIndex::open(&config)?;
            let mut found = 0;

            for record in index.records()? {
                if record.name().contains(query.as_str()) {
                    println!("[installed] {} {}", record.name(), record.descriptor.version);
                    found += 1;
                }
            }

            let catalog_path = config.catalog_path();
            if catalog_path.exists() {
                let catalog = Catalog::load(&catalog_path)?;
                for entry in catalog.search(query) {
                    println!("[repo] {} {} - {}", entry.name, entry.version, entry.description);
                    found += 1;
                }
            } else {
                println!("Repository catalog not synced; run 'mpkg update' to search it.");
            }

            if found == 0 {
                println!("No packages matching '{}'.", query);
            }
            Ok(())
        }
        Commands::Stats { json } => {
            let index = PackageIndex::open(&config)?;
            let stats = mpkg::stats::collect(&index)?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }

            println!("Installed packages: {}", stats.package_count);
            println!("Total size:         {}", format_size(stats.total_size));
            if !stats.largest.is_empty() {
                println!("\nLargest packages:");
                for (rank, package) in stats.largest.iter().enumerate() {
                    println!("  {}. {} ({})", rank + 1, package.name, format_size(package.size));
                }
            }
            Ok(())
        }
        Commands::Doctor => {
            let index = PackageIndex::open(&config)?;
            let report = audit(&index, &config.root)?;

            for missing in &report.missing {
                println!("Missing: {} (owned by {})", missing.path, missing.package);
            }
            for name in &report.orphaned_manifests {
                println!("Orphaned manifest: {} has files but no installed record", name);
            }
            println!(
                "\nChecked {} file(s) in {} package(s)",
                report.paths_checked, report.packages_checked
            );

            if !report.is_clean() {
                bail!(
                    "{} missing file(s), {} orphaned manifest(s)",
                    report.missing.len(),
                    report.orphaned_manifests.len()
                );
            }
            println!("No problems found.");
            Ok(())
        }
        Commands::History { limit } => {
            let conn = history::open(&config.history_path())?;
            let entries = HistoryEntry::list_recent(&conn, *limit)?;

            if entries.is_empty() {
                println!("No history.");
            } else {
                println!("Recent actions:");
                for entry in &entries {
                    println!(
                        "  [{}] {} {} {} ({}){}",
                        entry.id.unwrap_or_default(),
                        entry.created_at.as_deref().unwrap_or("-"),
                        entry.action,
                        entry.target,
                        entry.status.as_str(),
                        entry.message.as_deref().map(|m| format!(": {}", m)).unwrap_or_default()
                    );
                }
                println!("\nTotal: {} entr(ies)", entries.len());
            }
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}
