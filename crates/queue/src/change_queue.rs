//! Ordered, per-key coalescing change queue.
//!
//! Producers push Added/Updated/Deleted deltas keyed by [`ObjectKey`]. While
//! a key is still waiting in the queue, later deltas for it fold into the
//! queued one (see [`DeltaKind::coalesce`]) and keep its original position,
//! so the backlog grows with the number of distinct changed keys, not with
//! the raw event rate.
//!
//! Consumers pop one delta at a time and run a handler on it. A handler
//! error puts the delta back at the head of the queue, which gives
//! at-least-once processing with the retry policy left to the caller.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::{debug, trace};

use meterdef_core::ObjectKey;

use crate::consumer::Queue;
use crate::delta::{CoalescePolicy, Delta, DeltaKind};
use crate::error::QueueError;

struct QueueState<T> {
    order: VecDeque<ObjectKey>,
    items: HashMap<ObjectKey, Delta<T>>,
    closed: bool,
    populated: bool,
    /// Keys queued when the queue was marked populated and not yet drained.
    initial_keys: HashSet<ObjectKey>,
}

impl<T> QueueState<T> {
    fn remove_key(&mut self, key: &ObjectKey) {
        self.items.remove(key);
        self.order.retain(|k| k != key);
        self.initial_keys.remove(key);
    }

    fn take_next(&mut self) -> Option<Delta<T>> {
        while let Some(key) = self.order.pop_front() {
            if let Some(delta) = self.items.remove(&key) {
                return Some(delta);
            }
        }
        None
    }
}

/// Generic coalescing delta queue, instantiated once for rule changes and
/// once for Association changes.
pub struct ChangeQueue<T> {
    name: String,
    policy: CoalescePolicy,
    state: Mutex<QueueState<T>>,
    available: Notify,
}

impl<T> ChangeQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_policy(name, CoalescePolicy::default())
    }

    pub fn with_policy(name: impl Into<String>, policy: CoalescePolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            state: Mutex::new(QueueState {
                order: VecDeque::new(),
                items: HashMap::new(),
                closed: false,
                populated: false,
                initial_keys: HashSet::new(),
            }),
            available: Notify::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> CoalescePolicy {
        self.policy
    }

    pub fn add(&self, key: ObjectKey, object: T) -> Result<(), QueueError> {
        self.push(Delta::new(DeltaKind::Added, key, object))
    }

    pub fn update(&self, key: ObjectKey, object: T) -> Result<(), QueueError> {
        self.push(Delta::new(DeltaKind::Updated, key, object))
    }

    pub fn delete(&self, key: ObjectKey, object: T) -> Result<(), QueueError> {
        self.push(Delta::new(DeltaKind::Deleted, key, object))
    }

    /// Enqueue a delta, coalescing with any undrained delta for the same key.
    pub fn push(&self, delta: Delta<T>) -> Result<(), QueueError> {
        let mut state = self.state.lock().expect("change queue lock poisoned");
        if state.closed {
            return Err(QueueError::Closed(self.name.clone()));
        }

        let key = delta.key.clone();
        match state.items.remove(&key) {
            Some(queued) => {
                let queued_kind = queued.kind;
                let incoming_kind = delta.kind;
                match queued.merge(delta, self.policy) {
                    Some(merged) => {
                        trace!(
                            queue = %self.name,
                            key = %key,
                            from = %queued_kind,
                            with = %incoming_kind,
                            to = %merged.kind,
                            "coalesced delta"
                        );
                        state.items.insert(key, merged);
                    }
                    None => {
                        debug!(queue = %self.name, key = %key, "add and delete cancelled out");
                        state.remove_key(&key);
                        return Ok(());
                    }
                }
            }
            None => {
                state.order.push_back(key.clone());
                state.items.insert(key, delta);
            }
        }
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    /// Record that the initial full listing has been delivered.
    ///
    /// Only the first call has an effect: the keys queued at that moment
    /// become the initial population tracked by [`has_synced`](Self::has_synced).
    pub fn mark_populated(&self) {
        let mut state = self.state.lock().expect("change queue lock poisoned");
        if !state.populated {
            state.populated = true;
            state.initial_keys = state.order.iter().cloned().collect();
        }
    }

    /// Pop the next delta and run `handler` on it, waiting while the queue is empty.
    ///
    /// Returns `Ok(None)` once the queue is closed and fully drained. On
    /// handler failure the delta is requeued and the error returned.
    pub async fn pop<F, E>(&self, handler: F) -> Result<Option<ObjectKey>, E>
    where
        F: FnOnce(&Delta<T>) -> Result<(), E>,
    {
        let delta = loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().expect("change queue lock poisoned");
                if let Some(delta) = state.take_next() {
                    break delta;
                }
                if state.closed {
                    return Ok(None);
                }
            }

            notified.await;
        };

        self.finish(delta, handler).map(Some)
    }

    fn finish<F, E>(&self, delta: Delta<T>, handler: F) -> Result<ObjectKey, E>
    where
        F: FnOnce(&Delta<T>) -> Result<(), E>,
    {
        match handler(&delta) {
            Ok(()) => {
                let mut state = self.state.lock().expect("change queue lock poisoned");
                state.initial_keys.remove(&delta.key);
                Ok(delta.key)
            }
            Err(e) => {
                self.requeue(delta);
                Err(e)
            }
        }
    }

    /// Put a failed delta back at the head. A newer delta queued for the same
    /// key in the meantime is folded on top of it.
    fn requeue(&self, failed: Delta<T>) {
        let mut state = self.state.lock().expect("change queue lock poisoned");
        let key = failed.key.clone();
        match state.items.remove(&key) {
            Some(newer) => match failed.merge(newer, self.policy) {
                Some(merged) => {
                    state.items.insert(key, merged);
                }
                None => state.remove_key(&key),
            },
            None => {
                state.order.push_front(key.clone());
                state.items.insert(key, failed);
            }
        }
        drop(state);
        self.available.notify_one();
    }

    /// Stop accepting deltas and wake every waiting consumer.
    ///
    /// Consumers still drain what is already queued.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("change queue lock poisoned");
        state.closed = true;
        drop(state);
        self.available.notify_waiters();
        debug!(queue = %self.name, "change queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("change queue lock poisoned").closed
    }

    pub fn has_synced(&self) -> bool {
        let state = self.state.lock().expect("change queue lock poisoned");
        state.populated && state.initial_keys.is_empty()
    }

    /// Number of distinct keys waiting.
    pub fn len(&self) -> usize {
        self.state.lock().expect("change queue lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waiting keys in pop order.
    pub fn keys(&self) -> Vec<ObjectKey> {
        let state = self.state.lock().expect("change queue lock poisoned");
        state
            .order
            .iter()
            .filter(|k| state.items.contains_key(k))
            .cloned()
            .collect()
    }
}

impl<T: Clone> ChangeQueue<T> {
    /// Copy of the delta currently waiting for `key`.
    pub fn get(&self, key: &ObjectKey) -> Option<Delta<T>> {
        self.state
            .lock()
            .expect("change queue lock poisoned")
            .items
            .get(key)
            .cloned()
    }
}

impl<T> Queue<T> for ChangeQueue<T> {
    fn pop_ready<F, E>(&self, handler: F) -> Result<Option<ObjectKey>, E>
    where
        F: FnOnce(&Delta<T>) -> Result<(), E>,
    {
        let next = self
            .state
            .lock()
            .expect("change queue lock poisoned")
            .take_next();
        match next {
            Some(delta) => self.finish(delta, handler).map(Some),
            None => Ok(None),
        }
    }

    fn close(&self) {
        ChangeQueue::close(self)
    }

    fn has_synced(&self) -> bool {
        ChangeQueue::has_synced(self)
    }
}

#[cfg(test)]
mod tests;
