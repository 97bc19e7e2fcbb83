// src/error.rs

use thiserror::Error;

/// Core error types for mpkg
#[derive(Error, Debug)]
pub enum Error {
    /// Action history database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O errors with path context (record, manifest, or cache access)
    #[error("I/O error: {0}")]
    IoError(String),

    /// Initialization error (directories, clients, configuration)
    #[error("Failed to initialize: {0}")]
    InitError(String),

    /// The package fetcher could not produce an archive
    #[error("Fetch failed: {0}")]
    FetchError(String),

    /// Metadata entry or record is malformed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Archive could not be unpacked onto the filesystem
    #[error("Extraction failed: {0}")]
    ExtractionError(String),

    /// One or more declared dependencies are not installed
    #[error("{package}: missing dependencies: {}", .missing.join(", "))]
    MissingDependency {
        package: String,
        missing: Vec<String>,
    },

    /// A path is already owned by another package
    #[error("Conflict: {path} already owned by {owner}")]
    Conflict { path: String, owner: String },

    /// Operation requires an installed package
    #[error("Package '{0}' is not installed")]
    NotInstalled(String),

    /// Package is not present in the repository catalog
    #[error("Package '{0}' not found in repository catalog")]
    NotInCatalog(String),

    /// Package name cannot be used as an index key
    #[error("Invalid package name: {0}")]
    InvalidName(String),

    /// Another process holds the index lock
    #[error("Package index is locked by another process: {0}")]
    Locked(String),
}

/// Result type alias using mpkg's Error type
pub type Result<T> = std::result::Result<T, Error>;
