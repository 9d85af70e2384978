//! Memoized (rule, object) predicate outcomes.
//!
//! Entries are keyed by rule generation and object generation as well as by
//! the two keys, so an edited rule or a re-generated object never hits an
//! outcome computed for an older revision. Stale generations are never
//! looked up again and age out through LRU eviction.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use tracing::debug;

use meterdef_core::ObjectKey;

use crate::rule::Rule;

/// Result of evaluating one predicate; `Err` holds the evaluation failure.
pub type MatchOutcome = Result<bool, String>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchKey {
    pub rule: ObjectKey,
    pub rule_generation: i64,
    pub object: ObjectKey,
    pub object_generation: i64,
}

impl MatchKey {
    pub fn new(rule: &Rule, object: &ObjectKey, object_generation: i64) -> Self {
        Self {
            rule: rule.key.clone(),
            rule_generation: rule.generation(),
            object: object.clone(),
            object_generation,
        }
    }
}

/// Bounded LRU of predicate outcomes, owned by one RuleRegistry.
pub struct MatchCache {
    entries: Mutex<LruCache<MatchKey, MatchOutcome>>,
}

impl MatchCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &MatchKey) -> Option<MatchOutcome> {
        self.entries
            .lock()
            .expect("match cache lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: MatchKey, outcome: MatchOutcome) {
        self.entries
            .lock()
            .expect("match cache lock poisoned")
            .put(key, outcome);
    }

    /// Drop every entry recorded for `rule`, whatever its generation.
    pub fn forget_rule(&self, rule: &ObjectKey) -> usize {
        let mut entries = self.entries.lock().expect("match cache lock poisoned");
        let stale: Vec<MatchKey> = entries
            .iter()
            .filter(|(k, _)| &k.rule == rule)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        if !stale.is_empty() {
            debug!(rule = %rule, dropped = stale.len(), "purged match cache entries");
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("match cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().expect("match cache lock poisoned").clear();
    }
}
