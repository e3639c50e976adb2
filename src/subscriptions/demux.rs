//! Subscription demultiplexer: per-key fan-out with cross-key deduplication.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::coalesce::{ChangeCoalescer, CoalescerSignal};
use crate::events::{invoke_isolated, Callback, EventBus};
use crate::queue::DeferredQueue;
use crate::types::Key;

/// Handler invoked with the snapshot of keys changed in a flush cycle.
pub type KeyHandler = Callback<Vec<Key>>;

/// Observability counters for a demux instance.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct DemuxMetrics {
    /// Distinct keys with at least one subscribed handler.
    pub subscribed_keys: usize,
    /// Total handler registrations across all keys (a handler subscribed to
    /// N keys counts N times).
    pub handler_registrations: usize,
    /// Handler panics isolated during flushes.
    pub handler_panics: u64,
}

struct DemuxInner {
    /// Per-key handler buckets; the key doubles as the event name.
    keys: EventBus<Key, Vec<Key>>,
    coalescer: Arc<ChangeCoalescer>,
    queue: Arc<DeferredQueue>,
    panics: AtomicU64,
}

impl DemuxInner {
    /// Deliver one flush cycle.
    ///
    /// Reads the coalesced key set, clears the coalescer (so mutations made
    /// by the handlers below open a fresh cycle instead of being dropped
    /// with the old one), then invokes each distinct handler registered for
    /// any changed key exactly once, in key-then-registration order.
    fn process_flush(&self) {
        let changed = self.coalescer.updated_keys();
        if changed.is_empty() {
            return;
        }
        self.coalescer.clear_updated_keys();

        let mut seen = HashSet::new();
        let mut batch = Vec::new();
        for key in &changed {
            for (id, handler) in self.keys.snapshot(key) {
                if seen.insert(id) {
                    batch.push((id, handler));
                }
            }
        }
        tracing::trace!(
            keys = changed.len(),
            handlers = batch.len(),
            "demultiplexing flush cycle"
        );

        for (id, handler) in batch {
            // A handler unsubscribed from every changed key by an earlier
            // handler in this cycle is skipped.
            let live = changed.iter().any(|key| self.keys.contains(key, id));
            if live && !invoke_isolated(&handler, &changed) {
                self.panics.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Per-key subscription fan-out over a coalescer and a deferred queue.
///
/// Construction wires the coalescer's `HasChanges` signal to enqueue a
/// flush-processing task, so one task runs per cycle no matter how many
/// mutation batches preceded the flush. A handler subscribed to several
/// keys is invoked at most once per cycle even when many of them changed.
pub struct SubscriptionDemux {
    inner: Arc<DemuxInner>,
    signal_handler: Callback<()>,
}

impl SubscriptionDemux {
    pub fn new(coalescer: Arc<ChangeCoalescer>, queue: Arc<DeferredQueue>) -> Self {
        let inner = Arc::new(DemuxInner {
            keys: EventBus::new(),
            coalescer,
            queue,
            panics: AtomicU64::new(0),
        });

        let signal_handler: Callback<()> = {
            let weak = Arc::downgrade(&inner);
            Arc::new(move |_| {
                if let Some(inner) = weak.upgrade() {
                    let task_target = Arc::downgrade(&inner);
                    inner.queue.enqueue(Box::new(move || {
                        if let Some(inner) = task_target.upgrade() {
                            inner.process_flush();
                        }
                    }));
                }
            })
        };
        inner
            .coalescer
            .signals()
            .on(CoalescerSignal::HasChanges, Arc::clone(&signal_handler));

        Self {
            inner,
            signal_handler,
        }
    }

    /// Subscribe `handler` to one key. Idempotent per (key, handler).
    pub fn subscribe_on_key(&self, key: impl Into<Key>, handler: KeyHandler) {
        self.inner.keys.on(key.into(), handler);
    }

    /// Subscribe `handler` to each of `keys`.
    pub fn subscribe_on_keys(&self, keys: &[Key], handler: KeyHandler) {
        for key in keys {
            self.inner.keys.on(key.clone(), Arc::clone(&handler));
        }
    }

    /// Remove `handler` from one key. Returns false if it was not subscribed.
    pub fn unsubscribe_from_key(&self, key: &Key, handler: &KeyHandler) -> bool {
        self.inner.keys.off(key, handler)
    }

    /// Remove `handler` from each of `keys`.
    pub fn unsubscribe_from_keys(&self, keys: &[Key], handler: &KeyHandler) {
        for key in keys {
            self.inner.keys.off(key, handler);
        }
    }

    /// Remove every handler from every key.
    pub fn off_all(&self) {
        self.inner.keys.clear();
    }

    /// Current subscription counters.
    pub fn metrics(&self) -> DemuxMetrics {
        DemuxMetrics {
            subscribed_keys: self.inner.keys.event_count(),
            handler_registrations: self.inner.keys.total_handlers(),
            handler_panics: self.inner.panics.load(Ordering::SeqCst),
        }
    }

    /// Unhook from the coalescer and drop all subscriptions. Idempotent.
    pub fn destroy(&self) {
        self.inner
            .coalescer
            .signals()
            .off(&CoalescerSignal::HasChanges, &self.signal_handler);
        self.inner.keys.clear();
    }
}

impl Drop for SubscriptionDemux {
    fn drop(&mut self) {
        self.destroy();
    }
}
