//! The seam between the engine and the predicate language.
//!
//! The registry only ever asks "does rule R match object O"; how a
//! definition becomes an executable check is up to the injected
//! [`PredicateCompiler`].

use std::sync::Arc;

use meterdef_core::{CandidateObject, MeterDefinition};

/// A compiled rule check.
pub trait Predicate: Send + Sync {
    /// `Err` carries a human-readable reason the object could not be judged.
    fn matches(&self, object: &CandidateObject) -> Result<bool, String>;
}

impl<F> Predicate for F
where
    F: Fn(&CandidateObject) -> Result<bool, String> + Send + Sync,
{
    fn matches(&self, object: &CandidateObject) -> Result<bool, String> {
        self(object)
    }
}

/// Turns a rule specification into a [`Predicate`].
pub trait PredicateCompiler: Send + Sync {
    fn compile(&self, definition: &MeterDefinition) -> Result<Arc<dyn Predicate>, String>;
}

impl<F> PredicateCompiler for F
where
    F: Fn(&MeterDefinition) -> Result<Arc<dyn Predicate>, String> + Send + Sync,
{
    fn compile(&self, definition: &MeterDefinition) -> Result<Arc<dyn Predicate>, String> {
        self(definition)
    }
}
