//! [`ResyncCoordinator`]: applies rule changes to the object index.
//!
//! Drains the registry's rule change queue:
//! - Added / Updated: rematch every tracked object against the current rules.
//! - Deleted: cascade through the inverted index, rematching each object
//!   that still references the rule. Objects left with no matches are
//!   removed; the rest keep a reduced Association.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use meterdef_core::{Keyed, MeterDefinition, ObjectKey};
use meterdef_queue::{Delta, DeltaKind, Queue};
use meterdef_rules::RuleRegistry;

use crate::error::{IndexError, Result};
use crate::object_index::ObjectIndex;

pub struct ResyncCoordinator {
    registry: Arc<RuleRegistry>,
    index: Arc<ObjectIndex>,
}

impl ResyncCoordinator {
    pub fn new(registry: Arc<RuleRegistry>, index: Arc<ObjectIndex>) -> Self {
        Self { registry, index }
    }

    /// Apply one rule delta to the index.
    pub fn handle(&self, delta: &Delta<Arc<MeterDefinition>>) -> Result<()> {
        let payload_key = delta.object.key().map_err(|e| IndexError::MalformedDelta {
            key: delta.key.to_string(),
            reason: e.to_string(),
        })?;
        if payload_key != delta.key {
            return Err(IndexError::MalformedDelta {
                key: delta.key.to_string(),
                reason: format!("payload describes '{}'", payload_key),
            });
        }

        match delta.kind {
            DeltaKind::Added | DeltaKind::Updated => {
                let changed = self.index.rematch_all(false).map_err(|e| {
                    error!(rule = %delta.key, action = %delta.kind, error = %e, "rematch after rule change failed");
                    e
                })?;
                info!(rule = %delta.key, action = %delta.kind, changed, "rematched objects after rule change");
            }
            DeltaKind::Deleted => {
                let affected = self.cascade(&delta.key).map_err(|e| {
                    error!(rule = %delta.key, error = %e, "cascade after rule deletion failed");
                    e
                })?;
                info!(rule = %delta.key, affected, "cascaded rule deletion");
            }
        }
        Ok(())
    }

    /// Rematch every object whose Association still references `rule`.
    fn cascade(&self, rule: &ObjectKey) -> Result<usize> {
        let affected = self.index.by_index(rule)?;
        for association in &affected {
            let change = self.index.rematch(&association.key, false)?;
            debug!(rule = %rule, object = %association.key, ?change, "cascaded");
        }
        Ok(affected.len())
    }

    /// Handle the next queued rule delta, if any, without waiting.
    ///
    /// A failed delta stays queued for the next attempt.
    pub fn process_next(&self) -> Result<Option<ObjectKey>> {
        self.registry.changes().pop_ready(|delta| self.handle(delta))
    }

    /// Handle every queued rule delta. Stops at the first failure.
    pub fn drain(&self) -> Result<usize> {
        let mut handled = 0;
        while self.process_next()?.is_some() {
            handled += 1;
        }
        Ok(handled)
    }

    /// Consume rule deltas until `shutdown` fires or the queue is closed and
    /// drained. Failures are logged and retried after `retry_backoff`; the
    /// loop itself never exits on error.
    pub async fn run(&self, shutdown: Arc<Notify>, retry_backoff: Duration) {
        let changes = self.registry.changes();
        info!(queue = %changes.name(), "resync coordinator started");

        loop {
            tokio::select! {
                result = changes.pop(|delta| self.handle(delta)) => match result {
                    Ok(Some(rule)) => debug!(rule = %rule, "rule delta applied"),
                    Ok(None) => {
                        info!("rule change queue closed, coordinator exiting");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, backoff_ms = retry_backoff.as_millis() as u64, "rule delta failed, retrying");
                        tokio::time::sleep(retry_backoff).await;
                    }
                },
                _ = shutdown.notified() => {
                    info!("resync coordinator shutting down");
                    break;
                }
            }
        }
    }
}
