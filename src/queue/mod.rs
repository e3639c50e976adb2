//! Deferred execution: an ordered callback queue plus pluggable scheduling
//! policies deciding when the queue flushes.

mod deferred;
mod scheduler;

pub use deferred::{DeferredQueue, Task};
pub use scheduler::{
    EagerScheduler, FrameScheduler, InlineScheduler, ManualScheduler, Scheduler,
    SchedulerEvent, SchedulerKind, TimerScheduler, DEFAULT_FRAME_PERIOD,
};
