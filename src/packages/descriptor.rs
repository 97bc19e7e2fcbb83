// src/packages/descriptor.rs

//! Package descriptor parsing
//!
//! Both the `PKGINFO` entry inside an archive and the installed record on
//! disk are newline-separated `key=value` lines. This module owns the shared
//! line decoding and the descriptor type built from it.

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt::Write as _;

/// Longest accepted value for any single field
pub const MAX_FIELD_LEN: usize = 4096;

/// Longest accepted package name (it doubles as an index file name)
pub const MAX_NAME_LEN: usize = 255;

/// Parsed package metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: String,
    pub arch: String,
    /// Comma-separated dependency names, kept verbatim
    pub depends: String,
    pub description: String,
    /// Declared installed size in bytes
    pub size: u64,
}

impl PackageDescriptor {
    /// Descriptor carrying only a name, used when an archive has no metadata
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Decode `key=value` metadata lines
    ///
    /// Unknown keys are ignored and `size` falls back to zero when it isn't a
    /// decimal number.
    pub fn parse(content: &str) -> Result<Self> {
        let mut descriptor = Self::default();
        for (key, value) in parse_fields(content)? {
            descriptor.apply_field(key, value);
        }

        if !descriptor.name.is_empty() {
            validate_name(&descriptor.name)?;
        }

        Ok(descriptor)
    }

    /// Apply one decoded field; returns false for keys this type doesn't own
    pub(crate) fn apply_field(&mut self, key: &str, value: &str) -> bool {
        match key {
            "name" => self.name = value.to_string(),
            "version" => self.version = value.to_string(),
            "arch" => self.arch = value.to_string(),
            "description" => self.description = value.to_string(),
            "depends" => self.depends = value.to_string(),
            "size" => self.size = value.parse().unwrap_or(0),
            _ => return false,
        }
        true
    }

    /// Encode as `key=value` lines, in the order records are written
    pub fn to_fields(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail
        let _ = writeln!(out, "name={}", self.name);
        let _ = writeln!(out, "version={}", self.version);
        let _ = writeln!(out, "arch={}", self.arch);
        let _ = writeln!(out, "description={}", self.description);
        let _ = writeln!(out, "depends={}", self.depends);
        let _ = writeln!(out, "size={}", self.size);
        out
    }

    /// Declared dependency names, whitespace-trimmed, empty entries dropped
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        split_dependencies(&self.depends)
    }

    /// Whether any dependency is declared
    pub fn has_dependencies(&self) -> bool {
        self.dependencies().next().is_some()
    }
}

/// Split a comma-separated dependency list
pub fn split_dependencies(depends: &str) -> impl Iterator<Item = &str> {
    depends.split(',').map(str::trim).filter(|dep| !dep.is_empty())
}

/// Decode `key=value` lines into trimmed pairs
///
/// Blank lines, `#` comments, and lines without `=` are skipped. Values keep
/// any further `=` characters. Overlong values are rejected instead of being
/// cut short.
pub(crate) fn parse_fields(content: &str) -> Result<Vec<(&str, &str)>> {
    let mut fields = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        if value.len() > MAX_FIELD_LEN {
            return Err(Error::ParseError(format!(
                "Field '{}' is {} bytes long (limit {})",
                key,
                value.len(),
                MAX_FIELD_LEN
            )));
        }

        fields.push((key, value));
    }

    Ok(fields)
}

/// Check that a package name is safe to use as an index key
pub fn validate_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.len() > MAX_NAME_LEN {
        Some("name is too long")
    } else if name.starts_with('.') {
        Some("name starts with '.'")
    } else if name.contains(['/', '\\', '\0', '\n', '\r']) {
        Some("name contains a path separator or control character")
    } else if name.chars().any(char::is_whitespace) {
        Some("name contains whitespace")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(Error::InvalidName(format!("'{}': {}", name.escape_debug(), reason))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pkginfo() {
        let content = "name=foo\nversion=1.0\narch=x86_64\ndescription=The foo tool\ndepends=bar, baz\nsize=2048\n";
        let descriptor = PackageDescriptor::parse(content).unwrap();

        assert_eq!(descriptor.name, "foo");
        assert_eq!(descriptor.version, "1.0");
        assert_eq!(descriptor.arch, "x86_64");
        assert_eq!(descriptor.description, "The foo tool");
        assert_eq!(descriptor.depends, "bar, baz");
        assert_eq!(descriptor.size, 2048);
        assert_eq!(descriptor.dependencies().collect::<Vec<_>>(), vec!["bar", "baz"]);
    }

    #[test]
    fn test_unknown_keys_and_bad_size() {
        let content = "# comment\nname=foo\nmaintainer=someone\nsize=lots\nnot a field\n";
        let descriptor = PackageDescriptor::parse(content).unwrap();

        assert_eq!(descriptor.name, "foo");
        assert_eq!(descriptor.size, 0);
        assert!(descriptor.version.is_empty());
        assert!(!descriptor.has_dependencies());
    }

    #[test]
    fn test_value_keeps_equals_signs() {
        let descriptor = PackageDescriptor::parse("name=foo\ndescription=a=b\n").unwrap();
        assert_eq!(descriptor.description, "a=b");
    }

    #[test]
    fn test_overlong_field_rejected() {
        let content = format!("name=foo\ndescription={}\n", "x".repeat(MAX_FIELD_LEN + 1));
        let result = PackageDescriptor::parse(&content);
        assert!(matches!(result, Err(Error::ParseError(_))));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let result = PackageDescriptor::parse("name=../etc\n");
        assert!(matches!(result, Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_to_fields_round_trip() {
        let descriptor = PackageDescriptor {
            name: "foo".to_string(),
            version: "1.0".to_string(),
            arch: "aarch64".to_string(),
            depends: "bar,baz".to_string(),
            description: "desc".to_string(),
            size: 7,
        };

        let parsed = PackageDescriptor::parse(&descriptor.to_fields()).unwrap();
        assert_eq!(parsed, descriptor);
    }

    #[test]
    fn test_split_dependencies() {
        let deps: Vec<_> = split_dependencies(" a ,, b,c ,").collect();
        assert_eq!(deps, vec!["a", "b", "c"]);
        assert_eq!(split_dependencies("").count(), 0);
        assert_eq!(split_dependencies("  ").count(), 0);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("foo-bar_1.2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".hidden").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a b").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }
}
