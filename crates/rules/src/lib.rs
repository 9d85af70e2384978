//! Metering-rule registry and matching.
//!
//! This crate provides:
//! - The [`Predicate`] / [`PredicateCompiler`] seam and the built-in
//!   label/annotation/owner/namespace [`SelectorCompiler`]
//! - [`RuleRegistry`] with its [`MatchCache`] and [`IngestRateLimiter`]
//! - A YAML [`RuleLoader`] with hot-reload via `notify`

pub mod cache;
pub mod error;
pub mod limiter;
pub mod loader;
pub mod predicate;
pub mod registry;
pub mod rule;
pub mod selector;

pub use cache::{MatchCache, MatchKey, MatchOutcome};
pub use error::{Result, RuleError};
pub use limiter::IngestRateLimiter;
pub use loader::{LoadResult, LoadStatus, RuleLoader};
pub use predicate::{Predicate, PredicateCompiler};
pub use registry::{Admission, ResyncReport, RuleChangeQueue, RuleRegistry};
pub use rule::Rule;
pub use selector::{selector_matches, SelectorCompiler};
