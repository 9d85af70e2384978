//! Error type shared by the registry, the predicate layer and the loader.

use meterdef_core::CoreError;
use meterdef_queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// The rule specification could not be compiled into a predicate.
    /// The registry is left unchanged.
    #[error("rule '{rule}' failed to compile: {reason}")]
    Compile { rule: String, reason: String },

    /// A predicate could not be evaluated against an object.
    #[error("rule '{rule}' failed to evaluate object '{object}': {reason}")]
    Evaluation {
        rule: String,
        object: String,
        reason: String,
    },

    #[error(transparent)]
    Key(#[from] CoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parse/deserialization error.
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Filesystem watcher error.
    #[error("Notify watcher error: {0}")]
    Notify(#[from] notify::Error),
}

/// Result alias for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;
