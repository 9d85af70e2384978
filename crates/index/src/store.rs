//! Narrow store interface over keyed, generation-stamped objects.

use meterdef_core::ObjectKey;

use crate::error::Result;

/// What a write did to the stored entry for its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexChange {
    /// A new entry was created.
    Added,
    /// An existing entry was replaced.
    Updated,
    /// An existing entry was dropped.
    Removed,
    /// The entry was already current.
    Unchanged,
    /// Nothing is stored for the key and nothing needs to be.
    Untracked,
}

impl IndexChange {
    pub fn is_change(self) -> bool {
        matches!(self, IndexChange::Added | IndexChange::Updated | IndexChange::Removed)
    }
}

/// Lifecycle writes plus shared reads, as fed by an object event source.
pub trait Store {
    type Object;
    type Item;

    fn add(&self, object: Self::Object) -> Result<IndexChange>;
    fn update(&self, object: Self::Object) -> Result<IndexChange>;
    fn delete(&self, object: &Self::Object) -> Result<IndexChange>;
    fn list(&self) -> Vec<Self::Item>;
    fn get(&self, key: &ObjectKey) -> Option<Self::Item>;
}
