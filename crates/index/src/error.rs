use meterdef_core::CoreError;
use meterdef_queue::QueueError;
use meterdef_rules::RuleError;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Matching failed (compile, evaluation or registry error).
    #[error(transparent)]
    Rules(#[from] RuleError),

    #[error(transparent)]
    Key(#[from] CoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A rule delta whose payload does not agree with its key.
    #[error("malformed delta for '{key}': {reason}")]
    MalformedDelta { key: String, reason: String },

    /// The inverted index disagrees with the primary index.
    #[error("index invariant violated: {0}")]
    Invariant(String),

    #[error("object snapshot '{path}' unreadable: {reason}")]
    Snapshot { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, IndexError>;
