//! EventBus: per-event-name publish/subscribe with reentrancy-safe emission.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::bucket::Bucket;

/// Closure type for event handlers. Identity is the `Arc` allocation:
/// clones of one `Arc` count as the same handler.
pub type Callback<P> = Arc<dyn Fn(&P) + Send + Sync>;

/// Opaque handler identity, derived from the handler's `Arc` address.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(usize);

impl fmt::Debug for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerId({:#x})", self.0)
    }
}

/// Identity of a handler closure.
pub fn handler_id<P: 'static>(handler: &Callback<P>) -> HandlerId {
    HandlerId(Arc::as_ptr(handler) as *const () as usize)
}

/// Invoke a handler, isolating a panic per the pipeline-wide failure policy.
///
/// Returns false if the handler panicked. The panic is logged and swallowed;
/// remaining handlers in the round still run and no bus state is disturbed.
pub(crate) fn invoke_isolated<P: 'static>(handler: &Callback<P>, payload: &P) -> bool {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(payload)));
    if outcome.is_err() {
        tracing::error!("event handler panicked during emission; isolating and continuing");
    }
    outcome.is_ok()
}

/// Per-event-name publish/subscribe.
///
/// `E` is the event-name type (typically a small enum, or [`crate::Key`] for
/// per-key subscriptions); `P` is the payload type shared by all events on
/// the bus.
///
/// Buckets are created lazily on first `on`, compacted when tombstones reach
/// half the slots (and no emission is in progress), and deleted once empty.
/// Emission invokes the live handlers present at emission start in
/// registration order; handlers may call `on`/`off`/`emit` on this same bus
/// reentrantly. A handler registered during an emission is not invoked in
/// that round; a handler removed during an emission is skipped if its turn
/// has not yet come. No lock is held while a handler runs.
pub struct EventBus<E, P: 'static> {
    buckets: Mutex<HashMap<E, Bucket<P>>>,
}

impl<E: Eq + Hash, P: 'static> EventBus<E, P> {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Register `handler` for `event`. Registering the same handler twice
    /// for one event is a no-op. Returns the handler's identity.
    pub fn on(&self, event: E, handler: Callback<P>) -> HandlerId {
        let id = handler_id(&handler);
        let mut buckets = self.buckets.lock();
        buckets.entry(event).or_insert_with(Bucket::new).insert(id, handler);
        id
    }

    /// Remove `handler` from `event`. Returns false if it was not registered.
    pub fn off(&self, event: &E, handler: &Callback<P>) -> bool {
        self.off_id(event, handler_id(handler))
    }

    /// Remove a handler by identity.
    pub fn off_id(&self, event: &E, id: HandlerId) -> bool {
        let mut buckets = self.buckets.lock();
        let removed = match buckets.get_mut(event) {
            Some(bucket) => bucket.remove(id),
            None => false,
        };
        if removed {
            Self::settle_locked(&mut buckets, event);
        }
        removed
    }

    /// Remove every handler for `event`.
    pub fn off_all(&self, event: &E) {
        let mut buckets = self.buckets.lock();
        let drop_now = match buckets.get_mut(event) {
            Some(bucket) => {
                if bucket.idle() {
                    true
                } else {
                    // An emission is walking this bucket: tombstone in place,
                    // the shell is settled when the emission ends.
                    bucket.remove_all();
                    false
                }
            }
            None => return,
        };
        if drop_now {
            buckets.remove(event);
        }
    }

    /// Remove every handler for every event.
    pub fn clear(&self) {
        let mut buckets = self.buckets.lock();
        buckets.retain(|_, bucket| {
            if bucket.idle() {
                false
            } else {
                bucket.remove_all();
                true
            }
        });
    }

    /// Emit `payload` to every live handler registered for `event`, in
    /// registration order. Emitting with zero listeners is a silent no-op.
    pub fn emit(&self, event: &E, payload: &P) {
        let snapshot = {
            let mut buckets = self.buckets.lock();
            match buckets.get_mut(event) {
                Some(bucket) if bucket.live_count() > 0 => {
                    bucket.begin_emit();
                    bucket.snapshot()
                }
                _ => return,
            }
        };

        for (id, handler) in snapshot {
            // Skip handlers tombstoned earlier in this round.
            let live = self
                .buckets
                .lock()
                .get(event)
                .is_some_and(|bucket| bucket.contains(id));
            if live {
                invoke_isolated(&handler, payload);
            }
        }

        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get_mut(event) {
            bucket.end_emit();
        }
        Self::settle_locked(&mut buckets, event);
    }

    /// Whether a handler with identity `id` is registered for `event`.
    pub fn contains(&self, event: &E, id: HandlerId) -> bool {
        self.buckets
            .lock()
            .get(event)
            .is_some_and(|bucket| bucket.contains(id))
    }

    /// Whether `handler` is registered for `event`.
    pub fn is_registered(&self, event: &E, handler: &Callback<P>) -> bool {
        self.contains(event, handler_id(handler))
    }

    /// Number of live handlers for `event`.
    pub fn handler_count(&self, event: &E) -> usize {
        self.buckets
            .lock()
            .get(event)
            .map_or(0, |bucket| bucket.live_count())
    }

    /// Total live handlers across all events.
    pub fn total_handlers(&self) -> usize {
        self.buckets
            .lock()
            .values()
            .map(|bucket| bucket.live_count())
            .sum()
    }

    /// Number of events with at least one live handler.
    pub fn event_count(&self) -> usize {
        self.buckets
            .lock()
            .values()
            .filter(|bucket| bucket.live_count() > 0)
            .count()
    }

    /// Snapshot of the live handlers for `event` in registration order.
    ///
    /// The returned list is a copy; mutating the bus afterwards does not
    /// affect it.
    pub fn snapshot(&self, event: &E) -> Vec<(HandlerId, Callback<P>)> {
        self.buckets
            .lock()
            .get(event)
            .map_or_else(Vec::new, |bucket| bucket.snapshot())
    }

    /// Compact or drop a bucket that is no longer being emitted.
    fn settle_locked(buckets: &mut HashMap<E, Bucket<P>>, event: &E) {
        let drop_now = match buckets.get_mut(event) {
            Some(bucket) if bucket.idle() => {
                if bucket.is_dead() {
                    true
                } else {
                    if bucket.should_compact() {
                        bucket.compact();
                    }
                    false
                }
            }
            _ => false,
        };
        if drop_now {
            buckets.remove(event);
        }
    }
}

impl<E: Eq + Hash, P: 'static> Default for EventBus<E, P> {
    fn default() -> Self {
        Self::new()
    }
}
