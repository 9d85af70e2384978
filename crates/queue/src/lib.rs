//! Coalescing change queues carrying rule and Association deltas from the
//! writers of the matching engine to their consumers.

pub mod change_queue;
pub mod consumer;
pub mod delta;
pub mod error;

pub use change_queue::ChangeQueue;
pub use consumer::Queue;
pub use delta::{CoalescePolicy, Delta, DeltaKind};
pub use error::QueueError;
