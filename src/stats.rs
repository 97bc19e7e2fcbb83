// src/stats.rs

//! Installed package statistics

use crate::db::PackageIndex;
use crate::error::Result;
use serde::Serialize;

/// Number of largest packages kept
pub const TOP_COUNT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSize {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub package_count: usize,
    /// Sum of declared sizes in bytes
    pub total_size: u64,
    /// Largest packages, descending, at most `TOP_COUNT`
    pub largest: Vec<PackageSize>,
}

impl Stats {
    /// Account for one installed package
    ///
    /// A package enters the top list only if it is strictly larger than an
    /// entry already there (or fills a free slot with a non-zero size), so
    /// ties keep the package seen first.
    pub fn add(&mut self, name: &str, size: u64) {
        self.package_count += 1;
        self.total_size = self.total_size.saturating_add(size);

        if size == 0 {
            return;
        }
        let position = self
            .largest
            .iter()
            .position(|entry| size > entry.size)
            .unwrap_or(self.largest.len());
        if position < TOP_COUNT {
            self.largest.insert(
                position,
                PackageSize {
                    name: name.to_string(),
                    size,
                },
            );
            self.largest.truncate(TOP_COUNT);
        }
    }
}

/// Aggregate statistics over every installed record, in name order
pub fn collect(index: &PackageIndex) -> Result<Stats> {
    let mut stats = Stats::default();
    for record in index.records()? {
        stats.add(record.name(), record.descriptor.size);
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::InstalledPackage;
    use crate::packages::PackageDescriptor;

    #[test]
    fn test_top_list_is_bounded_and_sorted() {
        let mut stats = Stats::default();
        for (name, size) in [("a", 10), ("b", 50), ("c", 30), ("d", 70), ("e", 20), ("f", 60), ("g", 5)] {
            stats.add(name, size);
        }

        assert_eq!(stats.package_count, 7);
        assert_eq!(stats.total_size, 245);
        let names: Vec<_> = stats.largest.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["d", "f", "b", "c", "e"]);
    }

    #[test]
    fn test_zero_sizes_never_ranked() {
        let mut stats = Stats::default();
        stats.add("empty", 0);
        stats.add("small", 1);
        assert_eq!(stats.package_count, 2);
        assert_eq!(stats.largest.len(), 1);
        assert_eq!(stats.largest[0].name, "small");
    }

    #[test]
    fn test_ties_keep_first_seen() {
        let mut stats = Stats::default();
        stats.add("first", 100);
        stats.add("second", 100);
        assert_eq!(stats.largest[0].name, "first");
        assert_eq!(stats.largest[1].name, "second");
    }

    #[test]
    fn test_collect_from_index() {
        let temp_dir = tempfile::tempdir().unwrap();
        let index = PackageIndex::at(temp_dir.path()).unwrap();
        for (name, size) in [("bash", 4_000), ("zlib", 100), ("coreutils", 9_000)] {
            let mut descriptor = PackageDescriptor::named(name);
            descriptor.size = size;
            index.write_record(&InstalledPackage::new(descriptor, 0)).unwrap();
        }

        let stats = collect(&index).unwrap();
        assert_eq!(stats.package_count, 3);
        assert_eq!(stats.total_size, 13_100);
        assert_eq!(stats.largest[0].name, "coreutils");
        assert_eq!(stats.largest[2].name, "zlib");
    }
}
