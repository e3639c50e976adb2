//! Pipeline facade tying a source, coalescer, queue, and demux together.

use std::sync::Arc;

use crate::coalesce::ChangeCoalescer;
use crate::queue::{DeferredQueue, Scheduler, SchedulerKind};
use crate::sources::ChangeSource;
use crate::subscriptions::{DemuxMetrics, KeyHandler, SubscriptionDemux};
use crate::types::Key;

/// Pipeline configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// When flushes run. Defaults to the soonest asynchronous tick.
    pub scheduler: SchedulerKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::Eager,
        }
    }
}

/// A complete change-propagation pipeline over one source.
///
/// Wires source → coalescer → queue(scheduler) → demux by plain constructor
/// injection; every pipeline is independent, so one process can run many
/// (one per logical database, one per test) without shared state.
///
/// Mutate the source as usual; subscribed handlers are invoked once per
/// flush cycle with the deduplicated set of changed keys.
pub struct ChangePipeline {
    scheduler: Arc<dyn Scheduler>,
    queue: Arc<DeferredQueue>,
    coalescer: Arc<ChangeCoalescer>,
    demux: SubscriptionDemux,
}

impl ChangePipeline {
    /// Attach a pipeline to `source` with the configured scheduler.
    pub fn attach(source: &dyn ChangeSource, config: PipelineConfig) -> Self {
        Self::with_scheduler(source, config.scheduler.build())
    }

    /// Attach a pipeline to `source` with an injected scheduler instance.
    pub fn with_scheduler(source: &dyn ChangeSource, scheduler: Arc<dyn Scheduler>) -> Self {
        let queue = DeferredQueue::with_scheduler(Arc::clone(&scheduler));
        let coalescer = Arc::new(ChangeCoalescer::new(Arc::clone(source.changes())));
        let demux = SubscriptionDemux::new(Arc::clone(&coalescer), Arc::clone(&queue));
        Self {
            scheduler,
            queue,
            coalescer,
            demux,
        }
    }

    /// Subscribe `handler` to one key.
    pub fn subscribe_on_key(&self, key: impl Into<Key>, handler: KeyHandler) {
        self.demux.subscribe_on_key(key, handler);
    }

    /// Subscribe `handler` to each of `keys`.
    pub fn subscribe_on_keys(&self, keys: &[Key], handler: KeyHandler) {
        self.demux.subscribe_on_keys(keys, handler);
    }

    /// Remove `handler` from one key.
    pub fn unsubscribe_from_key(&self, key: &Key, handler: &KeyHandler) -> bool {
        self.demux.unsubscribe_from_key(key, handler)
    }

    /// Remove `handler` from each of `keys`.
    pub fn unsubscribe_from_keys(&self, keys: &[Key], handler: &KeyHandler) {
        self.demux.unsubscribe_from_keys(keys, handler);
    }

    /// The coalescer, for adapters that snapshot pending keys around
    /// flushes via its `BeforeFlush` / `AfterFlush` signals.
    pub fn coalescer(&self) -> &Arc<ChangeCoalescer> {
        &self.coalescer
    }

    /// The deferred queue driving flush cycles.
    pub fn queue(&self) -> &Arc<DeferredQueue> {
        &self.queue
    }

    /// The scheduler instance in use.
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Run any pending flush cycle right now, regardless of scheduling.
    pub fn flush_now(&self) {
        self.queue.flush();
    }

    /// Subscription counters.
    pub fn metrics(&self) -> DemuxMetrics {
        self.demux.metrics()
    }

    /// Tear the pipeline down: drop subscriptions, pending work, and the
    /// scheduler binding. Idempotent.
    pub fn destroy(&self) {
        self.demux.destroy();
        self.queue.destroy();
        self.coalescer.destroy();
    }
}

impl Drop for ChangePipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::Collection;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_end_to_end_with_manual_scheduler() {
        let users = Collection::new("users");
        let pipeline = ChangePipeline::attach(
            &users,
            PipelineConfig {
                scheduler: SchedulerKind::Manual,
            },
        );

        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&counter);
            pipeline.subscribe_on_key(
                "u1",
                Arc::new(move |_: &Vec<Key>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        users.upsert(json!({"id": "u1", "name": "Ada"})).unwrap();
        users.upsert(json!({"id": "u1", "name": "Ada L."})).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        pipeline.flush_now();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(pipeline.coalescer().updated_keys().is_empty());
    }

    #[test]
    fn test_destroy_disconnects_everything() {
        let users = Collection::new("users");
        let pipeline = ChangePipeline::attach(
            &users,
            PipelineConfig {
                scheduler: SchedulerKind::Manual,
            },
        );

        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = Arc::clone(&counter);
            pipeline.subscribe_on_key(
                "u1",
                Arc::new(move |_: &Vec<Key>| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        pipeline.destroy();
        users.upsert(json!({"id": "u1"})).unwrap();
        pipeline.flush_now();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(pipeline.metrics().handler_registrations, 0);
    }
}
