//! Narrow consumer-side queue contract.

use meterdef_core::ObjectKey;

use crate::delta::Delta;

/// Consumer view of a delta queue.
///
/// Implementations hand out one delta at a time. When the handler fails
/// the delta stays available so a later pop reprocesses it; the caller
/// decides when to retry.
pub trait Queue<T> {
    /// Pop the next delta if one is waiting and run `handler` on it.
    ///
    /// Returns `Ok(None)` when nothing is queued, `Ok(Some(key))` after the
    /// handler succeeded.
    fn pop_ready<F, E>(&self, handler: F) -> Result<Option<ObjectKey>, E>
    where
        F: FnOnce(&Delta<T>) -> Result<(), E>;

    /// Stop accepting new deltas and release blocked consumers.
    fn close(&self);

    /// Whether the initial population has been fully consumed.
    fn has_synced(&self) -> bool;
}
