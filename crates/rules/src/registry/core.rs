//! [`RuleRegistry`]: authoritative set of active rules.

use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use tracing::{debug, info};

use meterdef_core::{CandidateObject, EngineConfig, Keyed, MeterDefinition, ObjectKey};
use meterdef_queue::{ChangeQueue, CoalescePolicy, Delta, DeltaKind};

use crate::cache::{MatchCache, MatchKey};
use crate::error::{Result, RuleError};
use crate::limiter::IngestRateLimiter;
use crate::predicate::PredicateCompiler;
use crate::rule::Rule;

/// Rule change deltas carry the definition so deletes can be replayed
/// without the compiled rule.
pub type RuleChangeQueue = ChangeQueue<Arc<MeterDefinition>>;

/// Outcome of an admitted-or-not write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// The rule's token bucket was empty; the write was dropped.
    RateLimited,
}

/// Registry of active rules plus the per-registry match cache and ingest
/// rate limiter.
///
/// Critical sections:
/// - `add` / `update` / `delete` hold the write lock across compile,
///   admission, delta enqueue and map update, so no half-applied write is
///   ever visible.
/// - `list_rules`, `get` and the rule snapshot taken by `find_matches` hold
///   the read lock only.
pub struct RuleRegistry {
    rules: RwLock<IndexMap<ObjectKey, Arc<Rule>>>,
    compiler: Arc<dyn PredicateCompiler>,
    cache: MatchCache,
    limiter: IngestRateLimiter,
    changes: Arc<RuleChangeQueue>,
}

impl RuleRegistry {
    pub fn new(compiler: Arc<dyn PredicateCompiler>, config: &EngineConfig) -> Self {
        Self::with_parts(
            compiler,
            MatchCache::new(config.match_cache_capacity),
            IngestRateLimiter::new(&config.rate_limit),
        )
    }

    /// Build a registry around an explicitly provided cache and limiter.
    pub fn with_parts(
        compiler: Arc<dyn PredicateCompiler>,
        cache: MatchCache,
        limiter: IngestRateLimiter,
    ) -> Self {
        Self {
            rules: RwLock::new(IndexMap::new()),
            compiler,
            cache,
            limiter,
            // Rule writes take effect before the coordinator sees them, so an
            // undrained add followed by a delete must still cascade.
            changes: Arc::new(ChangeQueue::with_policy("rules", CoalescePolicy::RetainDeletes)),
        }
    }

    /// Admit a new rule, enqueueing an Added delta.
    pub fn add(&self, definition: MeterDefinition) -> Result<Admission> {
        self.admit(definition, DeltaKind::Added)
    }

    /// Replace a rule (predicate recompiled), enqueueing an Updated delta.
    pub fn update(&self, definition: MeterDefinition) -> Result<Admission> {
        self.admit(definition, DeltaKind::Updated)
    }

    fn admit(&self, definition: MeterDefinition, kind: DeltaKind) -> Result<Admission> {
        let key = definition.key()?;
        let mut rules = self.rules.write().expect("rules lock poisoned");

        let predicate = self
            .compiler
            .compile(&definition)
            .map_err(|reason| RuleError::Compile {
                rule: key.to_string(),
                reason,
            })?;

        let limiter_id = limiter_id(&definition, &key);
        if !self.limiter.allow(&limiter_id) {
            info!(
                rule = %key,
                uid = %limiter_id,
                action = %kind,
                "rule write rate limited, dropping"
            );
            return Ok(Admission::RateLimited);
        }

        let definition = Arc::new(definition);
        self.changes
            .push(Delta::new(kind, key.clone(), Arc::clone(&definition)))?;

        let rule = Arc::new(Rule {
            key: key.clone(),
            definition,
            predicate,
        });
        let generation = rule.generation();
        rules.insert(key.clone(), rule);

        info!(rule = %key, generation, action = %kind, "rule admitted");
        Ok(Admission::Admitted)
    }

    /// Remove a rule and its rate-limiter bucket, enqueueing a Deleted delta.
    ///
    /// Deleting an unknown rule still enqueues the delta so consumers can
    /// clean up anything that outlived a missed event.
    pub fn delete(&self, definition: &MeterDefinition) -> Result<()> {
        let key = definition.key()?;
        let mut rules = self.rules.write().expect("rules lock poisoned");

        self.changes.delete(key.clone(), Arc::new(definition.clone()))?;

        let removed = rules.shift_remove(&key);
        let limiter_id = match &removed {
            Some(rule) => limiter_id(&rule.definition, &key),
            None => limiter_id(definition, &key),
        };
        self.limiter.forget(&limiter_id);
        self.cache.forget_rule(&key);

        if removed.is_some() {
            info!(rule = %key, "rule deleted");
        } else {
            debug!(rule = %key, "delete for unknown rule");
        }
        Ok(())
    }

    /// Snapshot of the active rules in registry order.
    pub fn list_rules(&self) -> Vec<Arc<Rule>> {
        self.rules
            .read()
            .expect("rules lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<Rule>> {
        self.rules
            .read()
            .expect("rules lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.rules.read().expect("rules lock poisoned").contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.rules.read().expect("rules lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every active rule whose predicate accepts `object`, in registry order.
    ///
    /// Outcomes are memoized unless `skip_cache` is set, in which case the
    /// predicate runs again and the fresh outcome replaces the cached one.
    /// The first evaluation failure aborts the scan.
    pub fn find_matches(&self, object: &CandidateObject, skip_cache: bool) -> Result<Vec<Arc<Rule>>> {
        let object_key = object.key()?;
        let snapshot = self.list_rules();

        let mut matched = Vec::new();
        for rule in snapshot {
            let match_key = MatchKey::new(&rule, &object_key, object.generation());

            let cached = if skip_cache {
                None
            } else {
                self.cache.get(&match_key)
            };
            let outcome = match cached {
                Some(hit) => hit,
                None => {
                    let fresh = rule.predicate.matches(object);
                    self.cache.insert(match_key, fresh.clone());
                    fresh
                }
            };

            match outcome {
                Ok(true) => matched.push(rule),
                Ok(false) => {}
                Err(reason) => {
                    return Err(RuleError::Evaluation {
                        rule: rule.key.to_string(),
                        object: object_key.to_string(),
                        reason,
                    })
                }
            }
        }

        debug!(object = %object_key, matches = matched.len(), skip_cache, "matched object");
        Ok(matched)
    }

    /// Queue of rule deltas drained by the resync coordinator.
    pub fn changes(&self) -> Arc<RuleChangeQueue> {
        Arc::clone(&self.changes)
    }

    pub fn cache(&self) -> &MatchCache {
        &self.cache
    }

    pub fn limiter(&self) -> &IngestRateLimiter {
        &self.limiter
    }
}

/// Rules are rate limited per UID; definitions loaded without one fall back
/// to their key.
fn limiter_id(definition: &MeterDefinition, key: &ObjectKey) -> String {
    if definition.uid().is_empty() {
        key.to_string()
    } else {
        definition.uid().to_string()
    }
}
