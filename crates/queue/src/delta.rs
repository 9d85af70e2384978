//! Delta records and the per-key coalescing rule.

use std::fmt;

use meterdef_core::ObjectKey;

/// Lifecycle change carried by a [`Delta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    Added,
    Updated,
    Deleted,
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaKind::Added => write!(f, "Added"),
            DeltaKind::Updated => write!(f, "Updated"),
            DeltaKind::Deleted => write!(f, "Deleted"),
        }
    }
}

impl DeltaKind {
    /// Net effect of `self` followed by `later` on the same key.
    ///
    /// `None` means the two cancel out (an add that was deleted before any
    /// consumer saw it).
    pub fn coalesce(self, later: DeltaKind) -> Option<DeltaKind> {
        use DeltaKind::*;
        match (self, later) {
            (Added, Deleted) => None,
            (Added, _) => Some(Added),
            (Updated, Deleted) | (Deleted, Deleted) => Some(Deleted),
            (Updated, _) => Some(Updated),
            (Deleted, Added) | (Deleted, Updated) => Some(Updated),
        }
    }
}

/// How a queue folds an undrained Added followed by a Deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoalescePolicy {
    /// The pair cancels out and the key leaves the queue.
    #[default]
    CancelUnseen,
    /// The pair surfaces as a single Deleted. Used when the producer's
    /// state already acted on the add before any consumer saw it, so the
    /// consumer still has to clean up after the delete.
    RetainDeletes,
}

impl CoalescePolicy {
    /// Net effect of `earlier` followed by `later` under this policy.
    pub fn coalesce(self, earlier: DeltaKind, later: DeltaKind) -> Option<DeltaKind> {
        match (self, earlier, later) {
            (CoalescePolicy::RetainDeletes, DeltaKind::Added, DeltaKind::Deleted) => {
                Some(DeltaKind::Deleted)
            }
            _ => earlier.coalesce(later),
        }
    }
}

/// One queued change: what happened, to which key, and the latest payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta<T> {
    pub kind: DeltaKind,
    pub key: ObjectKey,
    pub object: T,
}

impl<T> Delta<T> {
    pub fn new(kind: DeltaKind, key: ObjectKey, object: T) -> Self {
        Self { kind, key, object }
    }

    /// Fold a later delta for the same key into this one.
    pub(crate) fn merge(self, later: Delta<T>, policy: CoalescePolicy) -> Option<Delta<T>> {
        policy
            .coalesce(self.kind, later.kind)
            .map(|kind| Delta::new(kind, later.key, later.object))
    }
}
