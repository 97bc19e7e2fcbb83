// src/packages/mod.rs

//! Package archive support for mpkg
//!
//! This module reads package archives: compression detection, the `PKGINFO`
//! metadata entry, and the list of files an archive would install.

pub mod archive;
pub mod descriptor;

pub use archive::{PackageArchive, read_descriptor};
pub use descriptor::PackageDescriptor;
