//! Core [`RuleLoader`] struct: directory-backed definitions with optional hot-reload.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use meterdef_core::{Keyed, MeterDefinition};

use crate::error::{Result, RuleError};
use crate::registry::{ResyncReport, RuleRegistry};

use super::report::{LoadResult, LoadStatus};
use super::watcher::handle_fs_event;

/// Definitions currently on disk, keyed by the file they came from.
pub(super) type DefinitionMap = Arc<RwLock<HashMap<PathBuf, MeterDefinition>>>;

/// Filesystem-backed MeterDefinition loader.
///
/// Scans a directory (recursively) for `*.yml` / `*.yaml` files, one
/// definition per file. The loaded set is the authoritative snapshot handed
/// to [`RuleRegistry::resync`].
pub struct RuleLoader {
    rules_dir: PathBuf,
    definitions: DefinitionMap,
    /// Held to keep the watcher alive.
    _watcher: Option<RecommendedWatcher>,
}

impl RuleLoader {
    /// Create a loader for `rules_dir`, creating the directory if missing.
    pub fn new(rules_dir: PathBuf) -> Self {
        if !rules_dir.exists() {
            if let Err(e) = fs::create_dir_all(&rules_dir) {
                warn!(path = %rules_dir.display(), error = %e, "failed to create rules directory");
            }
        }
        Self {
            rules_dir,
            definitions: Arc::new(RwLock::new(HashMap::new())),
            _watcher: None,
        }
    }

    /// Recursively scan the directory and (re)load every definition file.
    ///
    /// Dotfiles and non-YAML files are skipped. Parse errors are reported
    /// per file and do not abort the scan. Files that disappeared since the
    /// last scan are forgotten.
    pub fn load_all(&self) -> Result<Vec<LoadResult>> {
        let mut results = Vec::new();
        let mut loaded = HashMap::new();
        self.scan_dir(&self.rules_dir, &mut loaded, &mut results)?;

        let mut definitions = self.definitions.write().expect("definitions lock poisoned");
        for (path, definition) in loaded {
            let definition = match definitions.get(&path) {
                Some(previous) => bump_generation(previous, definition),
                None => definition,
            };
            definitions.insert(path, definition);
        }
        // A file that failed to parse keeps its previous version.
        let on_disk: HashSet<&PathBuf> = results
            .iter()
            .filter(|r| !matches!(r.status, LoadStatus::Skipped { .. }))
            .map(|r| &r.path)
            .collect();
        definitions.retain(|path, _| on_disk.contains(path));
        drop(definitions);

        Ok(results)
    }

    fn scan_dir(
        &self,
        dir: &Path,
        loaded: &mut HashMap<PathBuf, MeterDefinition>,
        results: &mut Vec<LoadResult>,
    ) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "failed to read directory");
                return Ok(());
            }
        };

        for entry in entries {
            let path = entry?.path();

            if path.is_dir() {
                if !is_hidden(&path) {
                    self.scan_dir(&path, loaded, results)?;
                }
                continue;
            }

            if is_hidden(&path) {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "dotfile".to_string(),
                    },
                });
                continue;
            }
            if !is_yaml(&path) {
                results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a YAML file".to_string(),
                    },
                });
                continue;
            }

            match self.load_file(&path) {
                Ok(definition) => {
                    let rule = definition.key()?.to_string();
                    info!(rule = %rule, path = %path.display(), "loaded meter definition");
                    loaded.insert(path.clone(), definition);
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Loaded { rule },
                    });
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load definition file");
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed {
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        Ok(())
    }

    /// Parse and validate a single definition file.
    pub fn load_file(&self, path: &Path) -> Result<MeterDefinition> {
        parse_definition(path)
    }

    /// Snapshot of the loaded definitions, ordered by file path.
    pub fn definitions(&self) -> Vec<MeterDefinition> {
        let definitions = self.definitions.read().expect("definitions lock poisoned");
        let mut entries: Vec<_> = definitions.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, d)| d.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.read().expect("definitions lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rescan the directory and reconcile `registry` against it.
    pub fn sync(&self, registry: &RuleRegistry) -> Result<ResyncReport> {
        self.load_all()?;
        registry.resync(self.definitions())
    }

    /// Start a filesystem watcher feeding `registry`.
    ///
    /// Create/modify upserts the file's definition; remove deletes it. A
    /// file that fails to parse or compile keeps its previous version.
    pub fn watch(&mut self, registry: Arc<RuleRegistry>) -> Result<()> {
        let definitions = Arc::clone(&self.definitions);

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => handle_fs_event(&event, &definitions, &registry),
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )?;

        watcher.watch(&self.rules_dir, RecursiveMode::Recursive)?;
        let _ = watcher.configure(notify::Config::default().with_poll_interval(Duration::from_millis(500)));

        info!(path = %self.rules_dir.display(), "watching definitions directory for changes");
        self._watcher = Some(watcher);
        Ok(())
    }

    pub fn rules_dir(&self) -> &Path {
        &self.rules_dir
    }

    pub(super) fn shared_definitions(&self) -> DefinitionMap {
        Arc::clone(&self.definitions)
    }
}

pub(super) fn parse_definition(path: &Path) -> Result<MeterDefinition> {
    let contents = fs::read_to_string(path)?;
    let definition: MeterDefinition = serde_yaml::from_str(&contents)?;
    definition
        .key()
        .map_err(|e| RuleError::Validation(format!("{}: {}", path.display(), e)))?;
    Ok(definition)
}

/// Hand-edited files rarely bump `metadata.generation`. A changed spec at
/// the same (or older) generation is moved past the previous one so the
/// match cache and resync both see the edit; an unchanged spec never moves
/// backwards.
pub(super) fn bump_generation(previous: &MeterDefinition, mut next: MeterDefinition) -> MeterDefinition {
    if next.generation() <= previous.generation() {
        next.metadata.generation = if next.spec == previous.spec {
            previous.generation()
        } else {
            previous.generation() + 1
        };
    }
    next
}

pub(super) fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yml" || e == "yaml")
        .unwrap_or(false)
}

pub(super) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}
