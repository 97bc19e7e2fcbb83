// src/repository/mod.rs

//! Repository access and package fetching
//!
//! This module provides:
//! - The `PackageFetcher` seam the transaction engine pulls archives through
//! - An HTTP fetcher downloading from the configured repository
//! - A local fetcher reading archives from a directory
//! - Catalog synchronisation (`repo.db`) and the catalog reader

pub mod catalog;

pub use catalog::{Catalog, CatalogEntry};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packages::descriptor::validate_name;
use reqwest::blocking::Client;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed downloads
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Archive extension used by the remote repository
const REMOTE_EXTENSION: &str = "tar.xz";

/// Archive extensions tried by the local fetcher, in order
const LOCAL_EXTENSIONS: &[&str] = &["tar.xz", "tar.zst", "tar.gz", "tgz", "tar"];

/// Catalog file name on the remote repository
const CATALOG_NAME: &str = "repo.db";

/// Produces a local archive for a package name
pub trait PackageFetcher {
    /// Return the path of an archive for `name`
    fn fetch(&self, name: &str) -> Result<PathBuf>;
}

impl<F: PackageFetcher + ?Sized> PackageFetcher for Box<F> {
    fn fetch(&self, name: &str) -> Result<PathBuf> {
        (**self).fetch(name)
    }
}

/// HTTP client wrapper with retry support
pub struct RepositoryClient {
    client: Client,
    max_retries: u32,
}

impl RepositoryClient {
    /// Create a new repository client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Download a file to the specified path with retry support
    ///
    /// The body is written to a temporary file beside `dest_path` and renamed
    /// into place, so `dest_path` never holds a partial download.
    pub fn download_file(&self, url: &str, dest_path: &Path) -> Result<()> {
        info!("Downloading {} to {}", url, dest_path.display());

        let parent = dest_path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
        })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(mut response) => {
                    if !response.status().is_success() {
                        return Err(Error::FetchError(format!(
                            "HTTP {} from {}",
                            response.status(),
                            url
                        )));
                    }

                    let mut temp = NamedTempFile::new_in(parent).map_err(|e| {
                        Error::IoError(format!("Failed to create file in {}: {}", parent.display(), e))
                    })?;

                    io::copy(&mut response, &mut temp).map_err(|e| {
                        Error::IoError(format!("Failed to write downloaded data: {}", e))
                    })?;

                    temp.persist(dest_path).map_err(|e| {
                        Error::IoError(format!(
                            "Failed to move download to {}: {}",
                            dest_path.display(),
                            e.error
                        ))
                    })?;

                    debug!("Successfully downloaded to {}", dest_path.display());
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::FetchError(format!(
                            "Failed to download {} after {} attempts: {}",
                            url, attempt, e
                        )));
                    }
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

/// Fetches `<repo_url>/<name>.tar.xz` into the download cache
pub struct HttpFetcher {
    client: RepositoryClient,
    repo_url: String,
    cache_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: RepositoryClient::new()?,
            repo_url: config.repo_url.clone(),
            cache_dir: config.cache_dir.clone(),
        })
    }

    /// Remote URL of a package archive
    pub fn package_url(&self, name: &str) -> String {
        join_url(&self.repo_url, &format!("{}.{}", name, REMOTE_EXTENSION))
    }

    /// Cache location of a package archive
    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", name, REMOTE_EXTENSION))
    }
}

impl PackageFetcher for HttpFetcher {
    fn fetch(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        info!("Grabbing {}", name);

        let dest = self.cache_path(name);
        self.client.download_file(&self.package_url(name), &dest)?;
        Ok(dest)
    }
}

/// Looks up archives in a local directory
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    dir: PathBuf,
}

impl LocalFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl PackageFetcher for LocalFetcher {
    fn fetch(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;

        LOCAL_EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", name, ext)))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                Error::FetchError(format!(
                    "No archive for '{}' in {}",
                    name,
                    self.dir.display()
                ))
            })
    }
}

/// Download the repository catalog into the index directory
///
/// Returns the number of packages the catalog advertises.
pub fn sync_repository(client: &RepositoryClient, config: &Config) -> Result<usize> {
    let url = join_url(&config.repo_url, CATALOG_NAME);
    let dest = config.catalog_path();

    client.download_file(&url, &dest)?;
    let catalog = Catalog::load(&dest)?;

    info!("Repository synced: {} packages", catalog.len());
    Ok(catalog.len())
}

/// Join a base URL and a file name with exactly one slash
fn join_url(base: &str, file: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://example.com/repo/", "repo.db"), "https://example.com/repo/repo.db");
        assert_eq!(join_url("https://example.com/repo", "foo.tar.xz"), "https://example.com/repo/foo.tar.xz");
    }

    #[test]
    fn test_http_fetcher_paths() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::rooted_at(temp_dir.path());
        config.repo_url = "https://example.com/mpkg/".to_string();

        let fetcher = HttpFetcher::new(&config).unwrap();
        assert_eq!(fetcher.package_url("foo"), "https://example.com/mpkg/foo.tar.xz");
        assert_eq!(fetcher.cache_path("foo"), temp_dir.path().join("cache/foo.tar.xz"));
    }

    #[test]
    fn test_http_fetcher_rejects_bad_names() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fetcher = HttpFetcher::new(&Config::rooted_at(temp_dir.path())).unwrap();
        assert!(matches!(fetcher.fetch("../x"), Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_local_fetcher_tries_extensions() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("foo.tar.gz"), b"").unwrap();
        fs::write(temp_dir.path().join("bar.tar.xz"), b"").unwrap();
        fs::write(temp_dir.path().join("bar.tar"), b"").unwrap();

        let fetcher = LocalFetcher::new(temp_dir.path());
        assert_eq!(fetcher.fetch("foo").unwrap(), temp_dir.path().join("foo.tar.gz"));
        // .tar.xz wins over .tar
        assert_eq!(fetcher.fetch("bar").unwrap(), temp_dir.path().join("bar.tar.xz"));
        assert!(matches!(fetcher.fetch("baz"), Err(Error::FetchError(_))));
    }

    #[test]
    fn test_boxed_fetcher() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("foo.tar"), b"").unwrap();

        let fetcher: Box<dyn PackageFetcher> = Box::new(LocalFetcher::new(temp_dir.path()));
        assert!(fetcher.fetch("foo").is_ok());
    }
}
