//! Scheduling policies: when does a queued flush actually run.
//!
//! A scheduler is a two-method capability (`schedule`/`cancel`) plus a
//! `Fired` event bus the queue listens to. `schedule` arranges exactly one
//! future fire and is idempotent while armed; `cancel` disarms and always
//! leaves the scheduler able to schedule again.
//!
//! Thread-backed variants share one worker loop armed over a channel; a
//! generation counter invalidates in-flight arms so `cancel` never blocks.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::events::EventBus;

/// Frame period used by [`FrameScheduler::default`], roughly one 60Hz tick.
pub const DEFAULT_FRAME_PERIOD: Duration = Duration::from_millis(16);

/// Events emitted by a scheduler.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SchedulerEvent {
    /// The scheduled moment arrived; the bound queue flushes now.
    Fired,
}

/// Decides when a queued flush runs.
pub trait Scheduler: Send + Sync {
    /// Arrange exactly one future `Fired` emission. Idempotent while a fire
    /// is already pending.
    fn schedule(&self);

    /// Disarm a pending fire. Safe to call when not armed; the scheduler
    /// remains usable afterwards.
    fn cancel(&self);

    /// The bus on which [`SchedulerEvent::Fired`] is emitted.
    fn fired(&self) -> &EventBus<SchedulerEvent, ()>;
}

/// Scheduler selection by variant tag.
#[derive(Clone, Debug)]
pub enum SchedulerKind {
    /// Never fires on its own; the caller invokes `flush` directly.
    Manual,
    /// Fires synchronously inside `schedule`.
    Inline,
    /// Fires at the soonest tick of a worker thread.
    Eager,
    /// Fires aligned to a fixed frame period (see [`DEFAULT_FRAME_PERIOD`]).
    Frame,
    /// Fires after a fixed delay.
    Timer(Duration),
}

impl SchedulerKind {
    /// Construct the scheduler this tag names.
    pub fn build(&self) -> Arc<dyn Scheduler> {
        match self {
            SchedulerKind::Manual => Arc::new(ManualScheduler::new()),
            SchedulerKind::Inline => Arc::new(InlineScheduler::new()),
            SchedulerKind::Eager => Arc::new(EagerScheduler::new()),
            SchedulerKind::Frame => Arc::new(FrameScheduler::default()),
            SchedulerKind::Timer(delay) => Arc::new(TimerScheduler::new(*delay)),
        }
    }
}

// --- Manual ---

/// No automatic firing: `schedule` only records that it was asked.
///
/// Used for deterministic tests; the caller drives the queue's `flush`
/// directly, or calls [`ManualScheduler::fire`] to exercise the event path.
pub struct ManualScheduler {
    bus: EventBus<SchedulerEvent, ()>,
    schedules: AtomicU64,
    cancels: AtomicU64,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            bus: EventBus::new(),
            schedules: AtomicU64::new(0),
            cancels: AtomicU64::new(0),
        }
    }

    /// Emit `Fired` now, as if the scheduled moment arrived.
    pub fn fire(&self) {
        self.bus.emit(&SchedulerEvent::Fired, &());
    }

    /// How many times `schedule` was called.
    pub fn schedule_count(&self) -> u64 {
        self.schedules.load(Ordering::SeqCst)
    }

    /// How many times `cancel` was called.
    pub fn cancel_count(&self) -> u64 {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self) {
        self.schedules.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn fired(&self) -> &EventBus<SchedulerEvent, ()> {
        &self.bus
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// --- Inline ---

/// Fires synchronously inside `schedule`: zero latency, no suspension.
///
/// If a running flush re-arms the scheduler (a task enqueued more work),
/// the request is deferred until the current fire returns and then served
/// as a separate fire, so each flush still drains only its own snapshot.
pub struct InlineScheduler {
    bus: EventBus<SchedulerEvent, ()>,
    firing: AtomicBool,
    rearm: AtomicBool,
}

impl InlineScheduler {
    pub fn new() -> Self {
        Self {
            bus: EventBus::new(),
            firing: AtomicBool::new(false),
            rearm: AtomicBool::new(false),
        }
    }
}

impl Scheduler for InlineScheduler {
    fn schedule(&self) {
        if self.firing.swap(true, Ordering::SeqCst) {
            self.rearm.store(true, Ordering::SeqCst);
            return;
        }
        loop {
            self.bus.emit(&SchedulerEvent::Fired, &());
            if !self.rearm.swap(false, Ordering::SeqCst) {
                break;
            }
        }
        self.firing.store(false, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.rearm.store(false, Ordering::SeqCst);
    }

    fn fired(&self) -> &EventBus<SchedulerEvent, ()> {
        &self.bus
    }
}

impl Default for InlineScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// --- Thread-backed variants ---

enum Cmd {
    Arm { generation: u64 },
    Shutdown,
}

enum FirePolicy {
    /// Fire as soon as the worker dequeues the arm.
    Eager,
    /// Fire after a fixed delay.
    Delay(Duration),
    /// Fire at the next boundary of a fixed period since worker start.
    Frame { period: Duration },
}

struct WorkerShared {
    bus: EventBus<SchedulerEvent, ()>,
    armed: AtomicBool,
    generation: AtomicU64,
}

/// Shared arm/cancel/fire machinery for the worker-thread schedulers.
struct FireCore {
    shared: Arc<WorkerShared>,
    tx: Sender<Cmd>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FireCore {
    fn start(policy: FirePolicy) -> Self {
        let shared = Arc::new(WorkerShared {
            bus: EventBus::new(),
            armed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        });
        let (tx, rx) = unbounded();
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("flush-scheduler".into())
            .spawn(move || run_worker(policy, worker_shared, rx))
            .expect("failed to spawn scheduler worker");
        Self {
            shared,
            tx,
            worker: Mutex::new(Some(handle)),
        }
    }

    fn schedule(&self) {
        if self.shared.armed.swap(true, Ordering::SeqCst) {
            tracing::trace!("schedule: fire already pending");
            return;
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        // A closed channel means the worker is gone; nothing left to arm.
        let _ = self.tx.send(Cmd::Arm { generation });
    }

    fn cancel(&self) {
        if self.shared.armed.swap(false, Ordering::SeqCst) {
            // Invalidate the in-flight arm without waking the worker.
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            tracing::trace!("canceled pending fire");
        }
    }
}

impl Drop for FireCore {
    fn drop(&mut self) {
        let _ = self.tx.send(Cmd::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

fn run_worker(policy: FirePolicy, shared: Arc<WorkerShared>, rx: Receiver<Cmd>) {
    let origin = Instant::now();
    let mut pending: Option<(u64, Instant)> = None;
    loop {
        let cmd = match pending {
            None => match rx.recv() {
                Ok(cmd) => cmd,
                Err(_) => break,
            },
            Some((generation, deadline)) => {
                let now = Instant::now();
                if now >= deadline {
                    fire(&shared, generation);
                    pending = None;
                    continue;
                }
                match rx.recv_timeout(deadline - now) {
                    Ok(cmd) => cmd,
                    Err(RecvTimeoutError::Timeout) => {
                        fire(&shared, generation);
                        pending = None;
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        };
        match cmd {
            // A newer arm supersedes any pending one (its generation is
            // stale by then anyway).
            Cmd::Arm { generation } => pending = Some((generation, deadline_for(&policy, origin))),
            Cmd::Shutdown => break,
        }
    }
}

fn fire(shared: &WorkerShared, generation: u64) {
    // Only fire if this arm is still current and nobody disarmed it.
    if shared.generation.load(Ordering::SeqCst) == generation
        && shared.armed.swap(false, Ordering::SeqCst)
    {
        tracing::debug!("scheduler fired");
        shared.bus.emit(&SchedulerEvent::Fired, &());
    }
}

fn deadline_for(policy: &FirePolicy, origin: Instant) -> Instant {
    let now = Instant::now();
    match policy {
        FirePolicy::Eager => now,
        FirePolicy::Delay(delay) => now + *delay,
        FirePolicy::Frame { period } => {
            let period_ns = period.as_nanos().max(1);
            let elapsed_ns = now.duration_since(origin).as_nanos();
            let remainder = period_ns - (elapsed_ns % period_ns);
            now + Duration::from_nanos(remainder as u64)
        }
    }
}

/// Fires at the soonest tick of a dedicated worker thread: the fastest
/// asynchronous policy available.
pub struct EagerScheduler {
    core: FireCore,
}

impl EagerScheduler {
    pub fn new() -> Self {
        Self {
            core: FireCore::start(FirePolicy::Eager),
        }
    }
}

impl Scheduler for EagerScheduler {
    fn schedule(&self) {
        self.core.schedule();
    }

    fn cancel(&self) {
        self.core.cancel();
    }

    fn fired(&self) -> &EventBus<SchedulerEvent, ()> {
        &self.core.shared.bus
    }
}

impl Default for EagerScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Fires after a fixed delay (default zero).
pub struct TimerScheduler {
    core: FireCore,
}

impl TimerScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            core: FireCore::start(FirePolicy::Delay(delay)),
        }
    }
}

impl Scheduler for TimerScheduler {
    fn schedule(&self) {
        self.core.schedule();
    }

    fn cancel(&self) {
        self.core.cancel();
    }

    fn fired(&self) -> &EventBus<SchedulerEvent, ()> {
        &self.core.shared.bus
    }
}

impl Default for TimerScheduler {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

/// Fires aligned to a fixed frame period, so flushes land on frame
/// boundaries rather than scattered between them.
pub struct FrameScheduler {
    core: FireCore,
}

impl FrameScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            core: FireCore::start(FirePolicy::Frame { period }),
        }
    }
}

impl Scheduler for FrameScheduler {
    fn schedule(&self) {
        self.core.schedule();
    }

    fn cancel(&self) {
        self.core.cancel();
    }

    fn fired(&self) -> &EventBus<SchedulerEvent, ()> {
        &self.core.shared.bus
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_PERIOD)
    }
}
