//! Per-source accumulator of changed keys.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::events::{Callback, EventBus};
use crate::sources::SourceEvent;
use crate::types::{Key, KeySet};

/// Signals emitted by a [`ChangeCoalescer`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CoalescerSignal {
    /// The pending set went from empty to non-empty. Fires at most once
    /// between two `clear_updated_keys` calls.
    HasChanges,
    /// The pending set is about to be cleared; consumers that need a final
    /// snapshot should read `updated_keys` now.
    BeforeFlush,
    /// The pending set was cleared.
    AfterFlush,
}

struct Pending {
    set: KeySet,
    /// Whether `HasChanges` already fired this cycle.
    signalled: bool,
}

struct CoalescerInner {
    pending: Mutex<Pending>,
    signals: EventBus<CoalescerSignal, ()>,
}

impl CoalescerInner {
    /// Merge a raw change batch into the pending set. An empty batch is a
    /// no-op; the first batch of a cycle fires `HasChanges`.
    fn absorb(&self, keys: &[Key]) {
        if keys.is_empty() {
            return;
        }
        let signal = {
            let mut pending = self.pending.lock();
            pending.set.extend_from(keys);
            if pending.signalled {
                false
            } else {
                pending.signalled = true;
                true
            }
        };
        // Emitted outside the lock so handlers can read the pending set.
        if signal {
            tracing::trace!(batch = keys.len(), "pending set became non-empty");
            self.signals.emit(&CoalescerSignal::HasChanges, &());
        }
    }
}

/// Accumulates the distinct keys changed on one source since the last clear.
///
/// Construction subscribes to the source's raw [`SourceEvent::Changed`]
/// stream. The pending set is a [`KeySet`], the same insertion-ordered index
/// abstraction the index stores use, so downstream consumers observe keys in
/// first-touch order.
pub struct ChangeCoalescer {
    inner: Arc<CoalescerInner>,
    source: Arc<EventBus<SourceEvent, Vec<Key>>>,
    raw_handler: Callback<Vec<Key>>,
}

impl ChangeCoalescer {
    /// Attach a new coalescer to a source's raw-change stream.
    pub fn new(source: Arc<EventBus<SourceEvent, Vec<Key>>>) -> Self {
        let inner = Arc::new(CoalescerInner {
            pending: Mutex::new(Pending {
                set: KeySet::new(),
                signalled: false,
            }),
            signals: EventBus::new(),
        });

        let raw_handler: Callback<Vec<Key>> = {
            let inner = Arc::clone(&inner);
            Arc::new(move |keys| inner.absorb(keys))
        };
        source.on(SourceEvent::Changed, Arc::clone(&raw_handler));

        Self {
            inner,
            source,
            raw_handler,
        }
    }

    /// Snapshot of the pending keys, in first-touch order.
    pub fn updated_keys(&self) -> Vec<Key> {
        self.inner.pending.lock().set.to_vec()
    }

    /// Whether any keys are pending.
    pub fn has_pending(&self) -> bool {
        !self.inner.pending.lock().set.is_empty()
    }

    /// Number of distinct pending keys.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().set.len()
    }

    /// Empty the pending set and reset the cycle flag.
    ///
    /// Emits `BeforeFlush` (pending set still readable), clears, then emits
    /// `AfterFlush`. Clearing an already-empty set is a silent success.
    pub fn clear_updated_keys(&self) {
        self.inner.signals.emit(&CoalescerSignal::BeforeFlush, &());
        {
            let mut pending = self.inner.pending.lock();
            pending.set.clear();
            pending.signalled = false;
        }
        self.inner.signals.emit(&CoalescerSignal::AfterFlush, &());
    }

    /// The signal bus (`HasChanges` / `BeforeFlush` / `AfterFlush`).
    pub fn signals(&self) -> &EventBus<CoalescerSignal, ()> {
        &self.inner.signals
    }

    /// Detach from the source and drop pending state. Idempotent.
    pub fn destroy(&self) {
        self.source.off(&SourceEvent::Changed, &self.raw_handler);
        let mut pending = self.inner.pending.lock();
        pending.set.clear();
        pending.signalled = false;
    }
}

impl Drop for ChangeCoalescer {
    fn drop(&mut self) {
        self.destroy();
    }
}
