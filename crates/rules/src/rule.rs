use std::fmt;
use std::sync::Arc;

use meterdef_core::{MeterDefinition, ObjectKey};

use crate::predicate::Predicate;

/// An admitted rule: its specification plus the compiled predicate.
#[derive(Clone)]
pub struct Rule {
    pub key: ObjectKey,
    pub definition: Arc<MeterDefinition>,
    pub predicate: Arc<dyn Predicate>,
}

impl Rule {
    pub fn uid(&self) -> &str {
        self.definition.uid()
    }

    pub fn generation(&self) -> i64 {
        self.definition.generation()
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("key", &self.key)
            .field("uid", &self.uid())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
