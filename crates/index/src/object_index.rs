//! [`ObjectIndex`]: Associations for every object matching at least one
//! rule, plus the rule → objects inverted index.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use meterdef_core::{Association, CandidateObject, Keyed, ObjectKey};
use meterdef_queue::{ChangeQueue, Delta, DeltaKind};
use meterdef_rules::RuleRegistry;

use crate::error::{IndexError, Result};
use crate::indexer::Indexed;
use crate::store::{IndexChange, Store};

pub type AssociationChangeQueue = ChangeQueue<Arc<Association>>;

fn association_rules(association: &Association) -> Vec<ObjectKey> {
    association.rules.clone()
}

/// Authoritative object → rules map.
///
/// One reader/writer lock guards the association table (and with it the
/// derived inverted index). Every write computes its matches, enqueues its
/// delta and updates the table while holding the write lock, so readers
/// never see an Association without its delta or index entries.
///
/// Lock order is index, then registry; the registry never calls back in.
pub struct ObjectIndex {
    registry: Arc<RuleRegistry>,
    associations: RwLock<Indexed<Association>>,
    changes: Arc<AssociationChangeQueue>,
}

impl ObjectIndex {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self {
            registry,
            associations: RwLock::new(Indexed::new(association_rules)),
            changes: Arc::new(ChangeQueue::new("associations")),
        }
    }

    /// Match `object` against the active rules and record the result.
    ///
    /// Zero matches leaves the object untracked (and drops an existing
    /// Association for it). So does an evaluation error, which is returned.
    pub fn add(&self, object: CandidateObject) -> Result<IndexChange> {
        let mut table = self.associations.write().expect("object index lock poisoned");
        self.apply(&mut table, Arc::new(object), false)
    }

    /// Like [`add`](Self::add), but a redelivery at the stored generation is
    /// a no-op.
    pub fn update(&self, object: CandidateObject) -> Result<IndexChange> {
        let key = object.key()?;
        let mut table = self.associations.write().expect("object index lock poisoned");
        if let Some(existing) = table.get(&key) {
            if existing.generation() == object.generation() {
                debug!(object = %key, generation = object.generation(), "generation unchanged, skipping");
                return Ok(IndexChange::Unchanged);
            }
        }
        self.apply(&mut table, Arc::new(object), false)
    }

    pub fn delete(&self, object: &CandidateObject) -> Result<IndexChange> {
        let key = object.key()?;
        self.delete_key(&key)
    }

    pub fn delete_key(&self, key: &ObjectKey) -> Result<IndexChange> {
        let mut table = self.associations.write().expect("object index lock poisoned");
        self.remove(&mut table, key)
    }

    /// Rematch one tracked object against the current rules.
    pub fn rematch(&self, key: &ObjectKey, skip_cache: bool) -> Result<IndexChange> {
        let mut table = self.associations.write().expect("object index lock poisoned");
        match table.get(key) {
            Some(existing) => self.apply(&mut table, Arc::clone(&existing.object), skip_cache),
            None => Ok(IndexChange::Untracked),
        }
    }

    /// Rematch every tracked object. Returns how many Associations changed.
    ///
    /// Every object is attempted; the first failure is returned after the
    /// pass. Objects that fail evaluation are dropped, so a retry of the
    /// same pass succeeds.
    pub fn rematch_all(&self, skip_cache: bool) -> Result<usize> {
        let mut table = self.associations.write().expect("object index lock poisoned");
        let objects: Vec<_> = table.list().into_iter().map(|a| Arc::clone(&a.object)).collect();

        let mut changed = 0;
        let mut first_error = None;
        for object in objects {
            match self.apply(&mut table, object, skip_cache) {
                Ok(change) if change.is_change() => changed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "rematch failed for tracked object");
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(tracked = table.len(), changed, skip_cache, "rematched tracked objects");
        match first_error {
            Some(e) => Err(e),
            None => Ok(changed),
        }
    }

    /// Full rematch of every tracked object, bypassing the match cache.
    pub fn resync(&self) -> Result<usize> {
        let changed = self.rematch_all(true)?;
        if changed > 0 {
            info!(changed, "object index resynced");
        }
        Ok(changed)
    }

    /// Rebuild from an authoritative object listing.
    ///
    /// Tracked objects missing from `objects` are dropped; every listed
    /// object is rematched with the cache bypassed. Marks the change queue
    /// populated. Returns the number of tracked objects afterwards.
    pub fn replace(&self, objects: Vec<CandidateObject>) -> Result<usize> {
        let mut table = self.associations.write().expect("object index lock poisoned");
        let mut first_error = None;

        let mut listed = HashSet::with_capacity(objects.len());
        let mut keyed = Vec::with_capacity(objects.len());
        for object in objects {
            match object.key() {
                Ok(key) => {
                    listed.insert(key);
                    keyed.push(object);
                }
                Err(e) => {
                    warn!(error = %e, "skipping listed object without a usable key");
                    first_error.get_or_insert(IndexError::from(e));
                }
            }
        }

        for key in table.keys() {
            if !listed.contains(&key) {
                if let Err(e) = self.remove(&mut table, &key) {
                    first_error.get_or_insert(e);
                }
            }
        }
        for object in keyed {
            if let Err(e) = self.apply(&mut table, Arc::new(object), true) {
                warn!(error = %e, "failed to index listed object");
                first_error.get_or_insert(e);
            }
        }

        self.changes.mark_populated();
        info!(listed = listed.len(), tracked = table.len(), "object index replaced");

        match first_error {
            Some(e) => Err(e),
            None => Ok(table.len()),
        }
    }

    fn apply(
        &self,
        table: &mut Indexed<Association>,
        object: Arc<CandidateObject>,
        skip_cache: bool,
    ) -> Result<IndexChange> {
        let key = object.key()?;
        let matched = match self.registry.find_matches(&object, skip_cache) {
            Ok(matched) => matched,
            Err(e) => {
                // Not admitted: drop whatever it matched before.
                if table.contains(&key) {
                    warn!(object = %key, error = %e, "evaluation failed, dropping association");
                    self.remove(table, &key)?;
                }
                return Err(e.into());
            }
        };

        if matched.is_empty() {
            return self.remove(table, &key);
        }

        let rules: Vec<ObjectKey> = matched.iter().map(|rule| rule.key.clone()).collect();
        let previous = table.get(&key);
        if let Some(previous) = &previous {
            if previous.rules == rules && previous.object == object {
                return Ok(IndexChange::Unchanged);
            }
        }

        let association = Arc::new(Association::new(key.clone(), object, rules));
        let (kind, change) = match previous {
            Some(_) => (DeltaKind::Updated, IndexChange::Updated),
            None => (DeltaKind::Added, IndexChange::Added),
        };
        self.changes
            .push(Delta::new(kind, key.clone(), Arc::clone(&association)))?;
        table.upsert(key.clone(), Arc::clone(&association))?;

        debug!(
            object = %key,
            generation = association.generation(),
            rules = association.rules.len(),
            action = %kind,
            "association written"
        );
        Ok(change)
    }

    fn remove(&self, table: &mut Indexed<Association>, key: &ObjectKey) -> Result<IndexChange> {
        let Some(existing) = table.get(key) else {
            return Ok(IndexChange::Untracked);
        };
        self.changes.delete(key.clone(), existing)?;
        table.remove(key)?;
        debug!(object = %key, "association removed");
        Ok(IndexChange::Removed)
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Every Association whose matched-rule set contains `rule`.
    pub fn by_index(&self, rule: &ObjectKey) -> Result<Vec<Arc<Association>>> {
        self.associations
            .read()
            .expect("object index lock poisoned")
            .by_index(rule)
    }

    /// Rules with at least one Association referencing them.
    pub fn indexed_rules(&self) -> Vec<ObjectKey> {
        self.associations
            .read()
            .expect("object index lock poisoned")
            .index_values()
    }

    pub fn list(&self) -> Vec<Arc<Association>> {
        self.associations.read().expect("object index lock poisoned").list()
    }

    pub fn list_keys(&self) -> Vec<ObjectKey> {
        self.associations.read().expect("object index lock poisoned").keys()
    }

    pub fn get(&self, object: &CandidateObject) -> Result<Option<Arc<Association>>> {
        let key = object.key()?;
        Ok(self.get_by_key(&key))
    }

    pub fn get_by_key(&self, key: &ObjectKey) -> Option<Arc<Association>> {
        self.associations.read().expect("object index lock poisoned").get(key)
    }

    pub fn len(&self) -> usize {
        self.associations.read().expect("object index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check the inverted index against the association table.
    pub fn verify(&self) -> Result<()> {
        self.associations.read().expect("object index lock poisoned").verify()
    }

    /// Association deltas for downstream consumers.
    pub fn changes(&self) -> Arc<AssociationChangeQueue> {
        Arc::clone(&self.changes)
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }
}

impl Store for ObjectIndex {
    type Object = CandidateObject;
    type Item = Arc<Association>;

    fn add(&self, object: CandidateObject) -> Result<IndexChange> {
        ObjectIndex::add(self, object)
    }

    fn update(&self, object: CandidateObject) -> Result<IndexChange> {
        ObjectIndex::update(self, object)
    }

    fn delete(&self, object: &CandidateObject) -> Result<IndexChange> {
        ObjectIndex::delete(self, object)
    }

    fn list(&self) -> Vec<Arc<Association>> {
        ObjectIndex::list(self)
    }

    fn get(&self, key: &ObjectKey) -> Option<Arc<Association>> {
        self.get_by_key(key)
    }
}
