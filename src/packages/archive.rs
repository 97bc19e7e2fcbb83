// src/packages/archive.rs

//! Package archive access
//!
//! A package is a tar archive, optionally compressed with gzip, xz, or zstd,
//! holding a `PKGINFO` metadata entry next to the payload. Compression is
//! detected from the leading magic bytes, never from the file name.

use crate::db::models::FileManifest;
use crate::error::{Error, Result};
use crate::packages::descriptor::PackageDescriptor;
use flate2::read::GzDecoder;
use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::{debug, warn};
use xz2::read::XzDecoder;

/// Name of the metadata entry
pub const METADATA_ENTRY: &str = "PKGINFO";

/// Name of the optional file listing entry, never extracted
pub const FILELIST_ENTRY: &str = "FILES";

/// Largest metadata entry that will be read
pub const MAX_METADATA_LEN: u64 = 64 * 1024;

/// Archive compression format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Gzip,
    Xz,
    Zstd,
    None,
}

impl CompressionFormat {
    /// Detect compression from the first bytes of the file
    pub fn detect(magic: &[u8]) -> Self {
        if magic.starts_with(&[0x1F, 0x8B]) {
            CompressionFormat::Gzip
        } else if magic.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
            CompressionFormat::Xz
        } else if magic.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
            CompressionFormat::Zstd
        } else {
            CompressionFormat::None
        }
    }
}

/// What an archive entry means for installation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryTarget {
    /// `PKGINFO` or `FILES`: package metadata, never written out
    Metadata,
    /// The archive root itself (`./`)
    Root,
    /// A payload entry, relative to the install root
    Payload(PathBuf),
}

impl EntryTarget {
    /// Classify a raw entry path
    ///
    /// Leading `./` and `/` are dropped. Any of these make the whole archive
    /// untrusted: climbing out of the root, a platform prefix, a non-UTF-8
    /// name, a control character, or a component with leading or trailing
    /// whitespace.
    pub fn classify(raw: &Path) -> Result<Self> {
        let mut relative = PathBuf::new();

        for component in raw.components() {
            match component {
                Component::CurDir | Component::RootDir => {}
                Component::Normal(part) => {
                    if let Some(text) = part.to_str() {
                        if text != text.trim() {
                            return Err(Error::ExtractionError(format!(
                                "Refusing archive path with padded component: {}",
                                raw.display().to_string().escape_debug()
                            )));
                        }
                    }
                    relative.push(part);
                }
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(Error::ExtractionError(format!(
                        "Refusing unsafe archive path: {}",
                        raw.display()
                    )));
                }
            }
        }

        let Some(text) = relative.to_str() else {
            return Err(Error::ExtractionError(format!(
                "Refusing non-UTF-8 archive path: {}",
                raw.display()
            )));
        };
        if text.chars().any(char::is_control) {
            return Err(Error::ExtractionError(format!(
                "Refusing archive path containing a control character: {}",
                raw.display().to_string().escape_debug()
            )));
        }

        if text.is_empty() {
            Ok(EntryTarget::Root)
        } else if text == METADATA_ENTRY || text == FILELIST_ENTRY {
            Ok(EntryTarget::Metadata)
        } else {
            Ok(EntryTarget::Payload(relative))
        }
    }
}

/// Whether an entry of this type leaves a file the manifest must own
///
/// Hard links count: each one is a separate name on disk.
pub fn installs_file(entry_type: EntryType) -> bool {
    matches!(
        entry_type,
        EntryType::Regular | EntryType::Continuous | EntryType::Link
    )
}

/// Absolute manifest form of a root-relative payload path
pub fn manifest_path(relative: &Path) -> String {
    format!("/{}", relative.to_string_lossy())
}

/// A package archive on disk
#[derive(Debug, Clone)]
pub struct PackageArchive {
    path: PathBuf,
    compression: CompressionFormat,
}

impl PackageArchive {
    /// Open an archive and detect its compression
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            Error::IoError(format!("Failed to open package file {}: {}", path.display(), e))
        })?;

        let mut reader = BufReader::new(file);
        let magic = reader.fill_buf().map_err(|e| {
            Error::IoError(format!("Failed to read package file {}: {}", path.display(), e))
        })?;
        let compression = CompressionFormat::detect(magic);
        debug!("Detected {:?} compression for {}", compression, path.display());

        Ok(Self {
            path: path.to_path_buf(),
            compression,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compression(&self) -> CompressionFormat {
        self.compression
    }

    /// Open a fresh decompressed tar stream over the archive
    pub fn tar(&self) -> Result<Archive<Box<dyn Read>>> {
        let file = File::open(&self.path).map_err(|e| {
            Error::IoError(format!("Failed to open package file {}: {}", self.path.display(), e))
        })?;
        let buffered = BufReader::new(file);

        let reader: Box<dyn Read> = match self.compression {
            CompressionFormat::Gzip => Box::new(GzDecoder::new(buffered)),
            CompressionFormat::Xz => Box::new(XzDecoder::new(buffered)),
            CompressionFormat::Zstd => {
                let decoder = zstd::Decoder::with_buffer(buffered).map_err(|e| {
                    Error::IoError(format!("Failed to create zstd decoder: {}", e))
                })?;
                Box::new(decoder)
            }
            CompressionFormat::None => Box::new(buffered),
        };

        Ok(Archive::new(reader))
    }

    /// Find and decode the metadata entry
    ///
    /// Returns `Ok(None)` when the archive has no metadata entry.
    pub fn read_descriptor(&self) -> Result<Option<PackageDescriptor>> {
        let mut archive = self.tar()?;
        let entries = archive
            .entries()
            .map_err(|e| Error::ParseError(format!("Failed to read archive: {}", e)))?;

        for entry in entries {
            let entry =
                entry.map_err(|e| Error::ParseError(format!("Failed to read entry: {}", e)))?;
            let raw_path = entry
                .path()
                .map_err(|e| Error::ParseError(format!("Failed to get entry path: {}", e)))?
                .into_owned();

            let is_metadata = matches!(EntryTarget::classify(&raw_path), Ok(EntryTarget::Metadata))
                && raw_path.file_name() == Some(OsStr::new(METADATA_ENTRY));
            if !is_metadata {
                continue;
            }

            let declared = entry.header().size().unwrap_or(0);
            if declared > MAX_METADATA_LEN {
                return Err(Error::ParseError(format!(
                    "{} entry is {} bytes (limit {})",
                    METADATA_ENTRY, declared, MAX_METADATA_LEN
                )));
            }

            let mut content = Vec::new();
            entry
                .take(MAX_METADATA_LEN)
                .read_to_end(&mut content)
                .map_err(|e| Error::ParseError(format!("Failed to read {}: {}", METADATA_ENTRY, e)))?;
            let content = String::from_utf8(content).map_err(|_| {
                Error::ParseError(format!("{} entry is not valid UTF-8", METADATA_ENTRY))
            })?;

            return PackageDescriptor::parse(&content).map(Some);
        }

        Ok(None)
    }

    /// List the files the archive would install, hard links included
    ///
    /// This is the candidate manifest checked for conflicts before anything
    /// touches the filesystem.
    pub fn file_manifest(&self) -> Result<FileManifest> {
        let mut archive = self.tar()?;
        let mut manifest = FileManifest::new();

        let entries = archive
            .entries()
            .map_err(|e| Error::ExtractionError(format!("Failed to read archive entries: {}", e)))?;

        for entry in entries {
            let entry = entry
                .map_err(|e| Error::ExtractionError(format!("Failed to read archive entry: {}", e)))?;
            let raw_path = entry
                .path()
                .map_err(|e| Error::ExtractionError(format!("Failed to get entry path: {}", e)))?
                .into_owned();

            if let EntryTarget::Payload(relative) = EntryTarget::classify(&raw_path)? {
                if installs_file(entry.header().entry_type()) {
                    manifest.push(manifest_path(&relative));
                }
            }
        }

        Ok(manifest)
    }
}

/// Read a package descriptor from an archive path
///
/// An archive that cannot be opened is treated the same as one without a
/// metadata entry: the result is `Ok(None)`.
pub fn read_descriptor(path: &Path) -> Result<Option<PackageDescriptor>> {
    match PackageArchive::open(path) {
        Ok(archive) => archive.read_descriptor(),
        Err(e) => {
            warn!("Cannot read metadata from {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Helpers for building package archives in tests

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::fs::File;
    use std::path::Path;
    use tar::{Builder, EntryType, Header};

    /// Entry to place in a test archive
    pub enum TestEntry<'a> {
        File(&'a str, &'a [u8]),
        Dir(&'a str),
        Symlink(&'a str, &'a str),
        HardLink(&'a str, &'a str),
    }

    /// Write a gzip-compressed package archive
    pub fn write_package(path: &Path, pkginfo: Option<&str>, entries: &[TestEntry]) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = Builder::new(encoder);

        if let Some(pkginfo) = pkginfo {
            append_file(&mut builder, "./PKGINFO", pkginfo.as_bytes(), 0o644);
        }

        for entry in entries {
            match entry {
                TestEntry::File(name, data) => append_file(&mut builder, name, data, 0o755),
                TestEntry::Dir(name) => {
                    let mut header = Header::new_gnu();
                    header.set_entry_type(EntryType::Directory);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_mtime(1_600_000_000);
                    header.set_cksum();
                    builder.append_data(&mut header, name, std::io::empty()).unwrap();
                }
                TestEntry::Symlink(name, target) => {
                    let mut header = Header::new_gnu();
                    header.set_entry_type(EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.set_mtime(1_600_000_000);
                    builder.append_link(&mut header, name, target).unwrap();
                }
                TestEntry::HardLink(name, target) => {
                    let mut header = Header::new_gnu();
                    header.set_entry_type(EntryType::Link);
                    header.set_size(0);
                    header.set_mode(0o755);
                    header.set_mtime(1_600_000_000);
                    builder.append_link(&mut header, name, target).unwrap();
                }
            }
        }

        builder.into_inner().unwrap().finish().unwrap();
    }

    /// Append a regular file, bypassing the builder's path sanitising
    ///
    /// Raw names let tests produce hostile archives (`../` entries).
    pub fn append_file<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8], mode: u32) {
        let mut header = Header::new_gnu();
        {
            let raw = header.as_gnu_mut().unwrap();
            raw.name[..name.len()].copy_from_slice(name.as_bytes());
        }
        header.set_entry_type(EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_mtime(1_600_000_000);
        header.set_cksum();
        builder.append(&header, data).unwrap();
    }
}
