//! Full-snapshot reconciliation of the registry.

use std::collections::HashSet;

use tracing::{info, warn};

use meterdef_core::{Keyed, MeterDefinition, ObjectKey};

use crate::error::{Result, RuleError};

use super::core::{Admission, RuleRegistry};

/// What one resync pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub rate_limited: usize,
    pub failed: usize,
}

impl ResyncReport {
    pub fn is_noop(&self) -> bool {
        *self == ResyncReport::default()
    }
}

impl RuleRegistry {
    /// Reconcile the registry against an authoritative listing of rules.
    ///
    /// - Listed rules missing from the registry are added.
    /// - Listed rules whose generation differs from the registered one are
    ///   updated (heals a missed Updated event).
    /// - Registered rules missing from the listing are deleted.
    ///
    /// Every entry is attempted; the first failure is returned after the
    /// pass completes. The rule change queue is marked populated afterwards.
    pub fn resync(&self, seen: Vec<MeterDefinition>) -> Result<ResyncReport> {
        let mut report = ResyncReport::default();
        let mut first_error: Option<RuleError> = None;
        let mut seen_keys: HashSet<ObjectKey> = HashSet::with_capacity(seen.len());

        for definition in seen {
            let key = match definition.key() {
                Ok(key) => key,
                Err(e) => {
                    warn!(error = %e, "skipping listed rule without a usable key");
                    report.failed += 1;
                    first_error.get_or_insert(e.into());
                    continue;
                }
            };
            seen_keys.insert(key.clone());

            let outcome = match self.get(&key) {
                None => self.add(definition).map(|a| (a, false)),
                Some(existing) if existing.generation() != definition.generation() => {
                    self.update(definition).map(|a| (a, true))
                }
                Some(_) => continue,
            };

            match outcome {
                Ok((Admission::Admitted, false)) => report.added += 1,
                Ok((Admission::Admitted, true)) => report.updated += 1,
                Ok((Admission::RateLimited, _)) => report.rate_limited += 1,
                Err(e) => {
                    warn!(rule = %key, error = %e, "resync failed to admit rule");
                    report.failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        let stale: Vec<_> = self
            .list_rules()
            .into_iter()
            .filter(|rule| !seen_keys.contains(&rule.key))
            .collect();
        for rule in stale {
            match self.delete(&rule.definition) {
                Ok(()) => report.deleted += 1,
                Err(e) => {
                    warn!(rule = %rule.key, error = %e, "resync failed to delete rule");
                    report.failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        self.changes().mark_populated();

        if !report.is_noop() {
            info!(
                added = report.added,
                updated = report.updated,
                deleted = report.deleted,
                rate_limited = report.rate_limited,
                failed = report.failed,
                "rule registry resynced"
            );
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
