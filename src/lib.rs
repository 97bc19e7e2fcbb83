// src/lib.rs

//! mpkg package manager
//!
//! A small package manager for minimal hosts. Packages are compressed tar
//! archives carrying a `PKGINFO` metadata entry; installed state lives in a
//! flat-file index of records and file manifests.
//!
//! # Architecture
//!
//! - Transactions: every install, update, remove, or ghost install runs one
//!   pipeline under an exclusive index lock
//! - Pre-flight checks: dependencies and file ownership conflicts are checked
//!   before anything touches the filesystem
//! - Rollback: a failed extraction removes every path it created
//! - File-level tracking: each installed file belongs to exactly one manifest

pub mod config;
pub mod db;
mod error;
pub mod filesystem;
pub mod packages;
pub mod repository;
pub mod resolver;
pub mod stats;
pub mod transaction;

pub use config::Config;
pub use error::{Error, Result};
