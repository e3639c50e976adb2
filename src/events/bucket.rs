//! Handler bucket: a slot arena with tombstoned removal.

use std::collections::HashMap;
use std::sync::Arc;

use super::bus::{handler_id, Callback, HandlerId};

/// Per-event handler storage.
///
/// Slots are append-only during an emission round; removal replaces the slot
/// with a tombstone so `off` never shifts the array. Compaction rebuilds the
/// arena without tombstones and is only run while no emission is in progress,
/// which keeps iteration bounds stable for reentrant callers.
pub(crate) struct Bucket<P: 'static> {
    slots: Vec<Option<Callback<P>>>,
    lookup: HashMap<HandlerId, usize>,
    tombstones: usize,
    /// Number of emissions currently walking this bucket.
    emitting: u32,
}

impl<P: 'static> Bucket<P> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            lookup: HashMap::new(),
            tombstones: 0,
            emitting: 0,
        }
    }

    /// Register a handler. Returns false if it is already present.
    pub fn insert(&mut self, id: HandlerId, handler: Callback<P>) -> bool {
        if self.lookup.contains_key(&id) {
            return false;
        }
        self.lookup.insert(id, self.slots.len());
        self.slots.push(Some(handler));
        true
    }

    /// Tombstone a handler. Returns false if it was not registered.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        match self.lookup.remove(&id) {
            Some(slot) => {
                self.slots[slot] = None;
                self.tombstones += 1;
                true
            }
            None => false,
        }
    }

    /// Tombstone every handler, leaving the arena shell in place for any
    /// emission currently in progress.
    pub fn remove_all(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.tombstones = self.slots.len();
        self.lookup.clear();
    }

    pub fn contains(&self, id: HandlerId) -> bool {
        self.lookup.contains_key(&id)
    }

    pub fn live_count(&self) -> usize {
        self.lookup.len()
    }

    /// True when no live handlers remain.
    pub fn is_dead(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn begin_emit(&mut self) {
        self.emitting += 1;
    }

    pub fn end_emit(&mut self) {
        debug_assert!(self.emitting > 0);
        self.emitting -= 1;
    }

    /// True when no emission is walking this bucket.
    pub fn idle(&self) -> bool {
        self.emitting == 0
    }

    /// Tombstones occupy at least half the slots.
    pub fn should_compact(&self) -> bool {
        !self.slots.is_empty() && self.tombstones * 2 >= self.slots.len()
    }

    /// Rebuild the arena without tombstones, preserving registration order.
    ///
    /// Must only be called while idle: compaction moves slot indices.
    pub fn compact(&mut self) {
        debug_assert!(self.idle());
        let live: Vec<Callback<P>> = self.slots.drain(..).flatten().collect();
        self.lookup.clear();
        self.tombstones = 0;
        for handler in live {
            let id = handler_id(&handler);
            self.lookup.insert(id, self.slots.len());
            self.slots.push(Some(handler));
        }
    }

    /// The live handlers at this instant, in registration order.
    pub fn snapshot(&self) -> Vec<(HandlerId, Callback<P>)> {
        self.slots
            .iter()
            .flatten()
            .map(|handler| (handler_id(handler), Arc::clone(handler)))
            .collect()
    }
}
