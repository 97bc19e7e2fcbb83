// src/resolver/mod.rs

//! Pre-extraction checks
//!
//! Both checks read the index only; neither writes anything.

pub mod conflicts;
pub mod deps;

pub use conflicts::check_conflicts;
pub use deps::{DependencyReport, verify_dependencies};
