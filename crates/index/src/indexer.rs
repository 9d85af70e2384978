//! Keyed table with one derived inverted index.
//!
//! The index function maps each stored item to the keys it should be
//! findable under. Every write updates the primary map and the inverted
//! map together, so the two never disagree while the caller holds `&mut`.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;

use meterdef_core::ObjectKey;

use crate::error::{IndexError, Result};

pub type IndexFn<T> = fn(&T) -> Vec<ObjectKey>;

pub struct Indexed<T> {
    items: IndexMap<ObjectKey, Arc<T>>,
    index_fn: IndexFn<T>,
    inverted: HashMap<ObjectKey, BTreeSet<ObjectKey>>,
}

impl<T> Indexed<T> {
    pub fn new(index_fn: IndexFn<T>) -> Self {
        Self {
            items: IndexMap::new(),
            index_fn,
            inverted: HashMap::new(),
        }
    }

    /// Insert or replace `key`, returning the previous item.
    ///
    /// On error nothing has changed.
    pub fn upsert(&mut self, key: ObjectKey, item: Arc<T>) -> Result<Option<Arc<T>>> {
        if let Some(previous) = self.items.get(&key).cloned() {
            self.unindex(&key, &previous)?;
        }
        for value in (self.index_fn)(&item) {
            self.inverted.entry(value).or_default().insert(key.clone());
        }
        Ok(self.items.insert(key, item))
    }

    /// Drop `key` and its index entries. On error nothing has changed.
    pub fn remove(&mut self, key: &ObjectKey) -> Result<Option<Arc<T>>> {
        let Some(previous) = self.items.get(key).cloned() else {
            return Ok(None);
        };
        self.unindex(key, &previous)?;
        self.items.shift_remove(key);
        Ok(Some(previous))
    }

    /// Remove `key` from every index entry of `item`, checking all of them
    /// before touching any.
    fn unindex(&mut self, key: &ObjectKey, item: &T) -> Result<()> {
        let values = (self.index_fn)(item);
        if let Some(missing) = values
            .iter()
            .find(|value| !self.inverted.get(*value).is_some_and(|keys| keys.contains(key)))
        {
            return Err(IndexError::Invariant(format!(
                "'{}' indexed under '{}' but the index entry is missing",
                key, missing
            )));
        }

        for value in values {
            if let Some(keys) = self.inverted.get_mut(&value) {
                keys.remove(key);
                if keys.is_empty() {
                    self.inverted.remove(&value);
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<T>> {
        self.items.get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.items.contains_key(key)
    }

    /// Items in insertion order.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.items.values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.items.keys().cloned().collect()
    }

    /// Every item indexed under `value`, ordered by key.
    pub fn by_index(&self, value: &ObjectKey) -> Result<Vec<Arc<T>>> {
        let Some(keys) = self.inverted.get(value) else {
            return Ok(Vec::new());
        };
        keys.iter()
            .map(|key| {
                self.items.get(key).cloned().ok_or_else(|| {
                    IndexError::Invariant(format!(
                        "index '{}' references '{}' which is not stored",
                        value, key
                    ))
                })
            })
            .collect()
    }

    /// Values with at least one item indexed under them.
    pub fn index_values(&self) -> Vec<ObjectKey> {
        let mut values: Vec<_> = self.inverted.keys().cloned().collect();
        values.sort();
        values
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Rebuild the inverted index from scratch and compare.
    pub fn verify(&self) -> Result<()> {
        let mut expected: HashMap<ObjectKey, BTreeSet<ObjectKey>> = HashMap::new();
        for (key, item) in &self.items {
            for value in (self.index_fn)(item) {
                expected.entry(value).or_default().insert(key.clone());
            }
        }
        if expected != self.inverted {
            return Err(IndexError::Invariant(
                "inverted index does not match stored items".to_string(),
            ));
        }
        Ok(())
    }
}
