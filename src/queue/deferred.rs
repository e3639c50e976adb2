//! Ordered queue of deferred callbacks with snapshot-drain flush.

use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::events::Callback;

use super::scheduler::{Scheduler, SchedulerEvent};

/// A queued unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct Attachment {
    scheduler: Arc<dyn Scheduler>,
    fire_handler: Callback<()>,
}

/// Holds callbacks until a flush executes them.
///
/// `flush` drains a snapshot taken at flush start and truncates the live
/// queue before invoking anything: work enqueued by a running task lands in
/// the next cycle, and a task that calls `flush` itself sees an empty queue
/// and returns immediately. This bounds every flush to the snapshot and
/// makes reentrant mutation during notification safe.
pub struct DeferredQueue {
    tasks: Mutex<Vec<Task>>,
    attached: Mutex<Option<Attachment>>,
}

impl DeferredQueue {
    /// A queue with no scheduler; the caller drives `flush` directly.
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            attached: Mutex::new(None),
        }
    }

    /// A queue that asks `scheduler` to arrange a flush whenever it
    /// transitions from empty to non-empty.
    pub fn with_scheduler(scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        let queue = Arc::new(Self::new());
        queue.attach(scheduler);
        queue
    }

    /// Bind a scheduler: the queue listens for its `Fired` event and arms it
    /// on the empty-to-non-empty transition. Replaces any prior binding.
    pub fn attach(self: &Arc<Self>, scheduler: Arc<dyn Scheduler>) {
        self.detach();
        let weak = Arc::downgrade(self);
        let fire_handler: Callback<()> = Arc::new(move |_| {
            if let Some(queue) = weak.upgrade() {
                queue.flush();
            }
        });
        scheduler
            .fired()
            .on(SchedulerEvent::Fired, Arc::clone(&fire_handler));
        *self.attached.lock() = Some(Attachment {
            scheduler,
            fire_handler,
        });
    }

    /// Unbind the scheduler, canceling any pending fire.
    pub fn detach(&self) {
        if let Some(attachment) = self.attached.lock().take() {
            attachment.scheduler.cancel();
            attachment
                .scheduler
                .fired()
                .off(&SchedulerEvent::Fired, &attachment.fire_handler);
        }
    }

    /// Append a task; on the empty-to-non-empty transition, arm the
    /// scheduler (if one is attached).
    pub fn enqueue(&self, task: Task) {
        let was_empty = {
            let mut tasks = self.tasks.lock();
            let was_empty = tasks.is_empty();
            tasks.push(task);
            was_empty
        };
        if was_empty {
            // Cloned out first: an inline scheduler fires (and flushes)
            // inside schedule(), which must not find any lock held.
            let scheduler = self
                .attached
                .lock()
                .as_ref()
                .map(|attachment| Arc::clone(&attachment.scheduler));
            if let Some(scheduler) = scheduler {
                scheduler.schedule();
            }
        }
    }

    /// Drain and execute a snapshot of the queue. A no-op when empty.
    ///
    /// Per the pipeline-wide failure policy, a panicking task is isolated:
    /// logged, counted against nothing, and the remaining snapshot still
    /// runs.
    pub fn flush(&self) {
        let batch: Vec<Task> = {
            let mut tasks = self.tasks.lock();
            if tasks.is_empty() {
                return;
            }
            std::mem::take(&mut *tasks)
        };
        tracing::trace!(tasks = batch.len(), "flushing deferred queue");
        for task in batch {
            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!("queued task panicked during flush; isolating and continuing");
            }
        }
    }

    /// Drop all pending tasks without running them and disarm the scheduler.
    pub fn clear(&self) {
        self.tasks.lock().clear();
        let scheduler = self
            .attached
            .lock()
            .as_ref()
            .map(|attachment| Arc::clone(&attachment.scheduler));
        if let Some(scheduler) = scheduler {
            scheduler.cancel();
        }
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Detach from the scheduler and drop all pending tasks. Idempotent.
    pub fn destroy(&self) {
        self.detach();
        self.tasks.lock().clear();
    }
}

impl Default for DeferredQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeferredQueue {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::super::scheduler::{InlineScheduler, ManualScheduler};
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_enqueue_arms_scheduler_once() {
        let scheduler = Arc::new(ManualScheduler::new());
        let queue = DeferredQueue::with_scheduler(scheduler.clone());

        queue.enqueue(Box::new(|| {}));
        queue.enqueue(Box::new(|| {}));
        queue.enqueue(Box::new(|| {}));

        assert_eq!(scheduler.schedule_count(), 1);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_flush_empty_queue_is_noop() {
        let queue = DeferredQueue::new();
        queue.flush();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush_runs_tasks_in_order() {
        let queue = DeferredQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let order = Arc::clone(&order);
            queue.enqueue(Box::new(move || order.lock().push(tag)));
        }
        queue.flush();

        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_task_enqueued_during_flush_runs_next_cycle() {
        let scheduler = Arc::new(ManualScheduler::new());
        let queue = DeferredQueue::with_scheduler(scheduler.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let queue = Arc::clone(&queue);
            let counter = Arc::clone(&counter);
            queue.clone().enqueue(Box::new(move || {
                let counter = Arc::clone(&counter);
                queue.enqueue(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }));
        }

        queue.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 1);
        // The refill re-armed the scheduler for the next cycle.
        assert_eq!(scheduler.schedule_count(), 2);

        queue.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nested_flush_returns_immediately() {
        let queue = Arc::new(DeferredQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        {
            let queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            queue.clone().enqueue(Box::new(move || {
                order.lock().push("outer");
                // The live queue was truncated before we ran.
                queue.flush();
                order.lock().push("outer-done");
            }));
        }
        {
            let order = Arc::clone(&order);
            queue.enqueue(Box::new(move || order.lock().push("second")));
        }

        queue.flush();
        assert_eq!(*order.lock(), vec!["outer", "outer-done", "second"]);
    }

    #[test]
    fn test_clear_drops_tasks_and_cancels() {
        let scheduler = Arc::new(ManualScheduler::new());
        let queue = DeferredQueue::with_scheduler(scheduler.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let counter = Arc::clone(&counter);
            queue.enqueue(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(scheduler.cancel_count(), 1);

        queue.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_inline_scheduler_flushes_synchronously() {
        let queue = DeferredQueue::with_scheduler(Arc::new(InlineScheduler::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let counter = Arc::clone(&counter);
            queue.enqueue(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_inline_scheduler_rearm_runs_followup_flush() {
        let queue = DeferredQueue::with_scheduler(Arc::new(InlineScheduler::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        {
            let queue = Arc::clone(&queue);
            let counter = Arc::clone(&counter);
            queue.clone().enqueue(Box::new(move || {
                let counter = Arc::clone(&counter);
                queue.enqueue(Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }));
        }

        // The follow-up task ran in a second, separate fire.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_destroy_detaches_scheduler() {
        let scheduler = Arc::new(ManualScheduler::new());
        let queue = DeferredQueue::with_scheduler(scheduler.clone());

        queue.enqueue(Box::new(|| {}));
        assert_eq!(scheduler.schedule_count(), 1);

        queue.destroy();
        assert!(queue.is_empty());

        queue.enqueue(Box::new(|| {}));
        assert_eq!(scheduler.schedule_count(), 1);
        // destroy is idempotent
        queue.destroy();
    }

    #[test]
    fn test_panicking_task_is_isolated() {
        let queue = DeferredQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        queue.enqueue(Box::new(|| panic!("boom")));
        {
            let counter = Arc::clone(&counter);
            queue.enqueue(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        queue.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());
    }
}
