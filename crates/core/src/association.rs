use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::key::ObjectKey;
use crate::object::CandidateObject;

/// The rules currently matching one workload object.
///
/// Only objects with at least one matching rule get an Association.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub key: ObjectKey,
    pub object: Arc<CandidateObject>,
    /// Matching rule keys in registry order, without duplicates.
    pub rules: Vec<ObjectKey>,
    pub matched_at: DateTime<Utc>,
}

impl Association {
    pub fn new(key: ObjectKey, object: Arc<CandidateObject>, rules: Vec<ObjectKey>) -> Self {
        let mut unique = Vec::with_capacity(rules.len());
        for rule in rules {
            if !unique.contains(&rule) {
                unique.push(rule);
            }
        }
        Self {
            key,
            object,
            rules: unique,
            matched_at: Utc::now(),
        }
    }

    pub fn generation(&self) -> i64 {
        self.object.generation()
    }

    pub fn contains_rule(&self, rule: &ObjectKey) -> bool {
        self.rules.contains(rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_drops_duplicate_rules_keeping_order() {
        let obj = Arc::new(CandidateObject::new("Pod", "ns", "a"));
        let r1 = ObjectKey::new("ns", "r1");
        let r2 = ObjectKey::new("ns", "r2");
        let assoc = Association::new(
            ObjectKey::new("ns", "a"),
            obj,
            vec![r2.clone(), r1.clone(), r2.clone()],
        );
        assert_eq!(assoc.rules, vec![r2, r1.clone()]);
        assert!(assoc.contains_rule(&r1));
        assert_eq!(assoc.generation(), 1);
    }
}
