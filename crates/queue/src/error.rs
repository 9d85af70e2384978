//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("change queue '{0}' is closed")]
    Closed(String),
}
