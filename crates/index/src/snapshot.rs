//! Object listings read from a directory of YAML manifests.
//!
//! Each `*.yaml` / `*.yml` file may hold several `---`-separated objects.
//! Any unreadable file fails the whole listing, so a partial snapshot is
//! never handed to [`ObjectIndex::replace`](crate::ObjectIndex::replace)
//! (which would drop the missing objects).

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use meterdef_core::CandidateObject;

use crate::error::{IndexError, Result};

/// Every object found under `dir`, recursively, in path order.
pub fn load_objects(dir: &Path) -> Result<Vec<CandidateObject>> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();

    let mut objects = Vec::new();
    for path in &files {
        let contents = fs::read_to_string(path).map_err(|e| snapshot_error(path, e))?;
        for document in serde_yaml::Deserializer::from_str(&contents) {
            let value = serde_yaml::Value::deserialize(document).map_err(|e| snapshot_error(path, e))?;
            if value.is_null() {
                continue;
            }
            let object: CandidateObject =
                serde_yaml::from_value(value).map_err(|e| snapshot_error(path, e))?;
            objects.push(object);
        }
    }

    debug!(dir = %dir.display(), files = files.len(), objects = objects.len(), "loaded object snapshot");
    Ok(objects)
}

fn collect_files(dir: &Path, files: &mut Vec<std::path::PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| snapshot_error(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| snapshot_error(dir, e))?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false);
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, files)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == "yml" || e == "yaml")
            .unwrap_or(false)
        {
            files.push(path);
        }
    }
    Ok(())
}

fn snapshot_error(path: &Path, e: impl std::fmt::Display) -> IndexError {
    IndexError::Snapshot {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
