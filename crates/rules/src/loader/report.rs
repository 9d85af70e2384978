//! Per-file outcomes of a directory scan.

use std::path::PathBuf;

/// Outcome of loading a single definition file.
#[derive(Debug)]
pub struct LoadResult {
    pub path: PathBuf,
    pub status: LoadStatus,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LoadStatus {
    /// Definition parsed; carries its `namespace/name` key.
    Loaded { rule: String },
    /// Dotfile or non-YAML file.
    Skipped { reason: String },
    /// Parse or validation error.
    Failed { error: String },
}

impl LoadResult {
    pub fn is_loaded(&self) -> bool {
        matches!(self.status, LoadStatus::Loaded { .. })
    }
}
