//! Filesystem event handler for the notify watcher (hot-reload).

use std::path::Path;

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind};
use tracing::{info, warn};

use meterdef_core::Keyed;

use crate::error::Result;
use crate::registry::{Admission, RuleRegistry};

use super::core::{bump_generation, is_hidden, is_yaml, parse_definition, DefinitionMap};

/// Handle a single filesystem event from the notify watcher.
pub(super) fn handle_fs_event(event: &Event, definitions: &DefinitionMap, registry: &RuleRegistry) {
    for path in &event.paths {
        if !is_yaml(path) || is_hidden(path) {
            continue;
        }

        let outcome = match &event.kind {
            EventKind::Create(CreateKind::File)
            | EventKind::Create(CreateKind::Any)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(_)) => {
                // Renames report both ends; the old name no longer exists.
                if path.exists() {
                    upsert_file(path, definitions, registry).map(|_| ())
                } else {
                    remove_file(path, definitions, registry).map(|_| ())
                }
            }
            EventKind::Remove(RemoveKind::File) | EventKind::Remove(RemoveKind::Any) => {
                remove_file(path, definitions, registry).map(|_| ())
            }
            _ => Ok(()),
        };

        if let Err(e) = outcome {
            warn!(
                path = %path.display(),
                error = %e,
                "failed to apply definition change, keeping previous version"
            );
        }
    }
}

/// Parse `path` and push its definition into `registry`.
///
/// A file whose definition changed key retracts the old rule. The
/// definition is remembered even when rate limited, so the next resync
/// applies it.
pub(super) fn upsert_file(
    path: &Path,
    definitions: &DefinitionMap,
    registry: &RuleRegistry,
) -> Result<Admission> {
    let parsed = parse_definition(path)?;
    let key = parsed.key()?;

    let previous = definitions
        .read()
        .expect("definitions lock poisoned")
        .get(path)
        .cloned();
    let definition = match &previous {
        Some(previous) => bump_generation(previous, parsed),
        None => parsed,
    };

    let admission = if registry.contains(&key) {
        registry.update(definition.clone())?
    } else {
        registry.add(definition.clone())?
    };

    if let Some(previous) = &previous {
        if previous.key()? != key {
            registry.delete(previous)?;
        }
    }

    info!(
        rule = %key,
        generation = definition.generation(),
        path = %path.display(),
        admitted = admission == Admission::Admitted,
        "hot-reloaded meter definition"
    );
    definitions
        .write()
        .expect("definitions lock poisoned")
        .insert(path.to_path_buf(), definition);
    Ok(admission)
}

/// Retract the definition that came from `path`. Returns whether one was
/// known.
pub(super) fn remove_file(path: &Path, definitions: &DefinitionMap, registry: &RuleRegistry) -> Result<bool> {
    let removed = definitions
        .write()
        .expect("definitions lock poisoned")
        .remove(path);

    match removed {
        Some(definition) => {
            registry.delete(&definition)?;
            info!(rule = %definition.key()?, path = %path.display(), "removed meter definition after file deletion");
            Ok(true)
        }
        None => Ok(false),
    }
}
