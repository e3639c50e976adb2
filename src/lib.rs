//! # Ripple
//!
//! A batched, deduplicated change-notification pipeline for in-memory keyed
//! stores. Mutation sources report raw "these keys changed" batches; after a
//! unit of work, subscribed observers are told exactly which keys changed,
//! once per flush cycle, at a configurable latency.
//!
//! ## Core Concepts
//!
//! - **EventBus**: per-event-name publish/subscribe, safe to mutate during
//!   emission
//! - **Coalescing**: many raw mutation batches collapse into one
//!   deduplicated key set and one signal per cycle
//! - **Deferred queue + scheduler**: flushes run synchronously, at the
//!   soonest tick, on frame boundaries, or after a delay
//! - **Demultiplexing**: per-key subscriptions, each handler invoked at
//!   most once per cycle however many of its keys changed
//!
//! ## Example
//!
//! ```ignore
//! use ripple::{ChangePipeline, Collection, Key, PipelineConfig, SchedulerKind};
//!
//! let users = Collection::new("users");
//! let pipeline = ChangePipeline::attach(&users, PipelineConfig {
//!     scheduler: SchedulerKind::Manual,
//! });
//!
//! pipeline.subscribe_on_key("u1", std::sync::Arc::new(|changed| {
//!     println!("changed: {:?}", changed);
//! }));
//!
//! users.upsert(serde_json::json!({"id": "u1", "name": "Ada"}))?;
//! users.upsert(serde_json::json!({"id": "u1", "role": "admin"}))?;
//!
//! // Both writes collapse into one notification.
//! pipeline.flush_now();
//! ```

pub mod coalesce;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod queue;
pub mod sources;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use coalesce::{ChangeCoalescer, CoalescerSignal};
pub use error::{PipelineError, Result};
pub use events::{handler_id, Callback, EventBus, HandlerId};
pub use pipeline::{ChangePipeline, PipelineConfig};
pub use queue::{
    DeferredQueue, EagerScheduler, FrameScheduler, InlineScheduler, ManualScheduler, Scheduler,
    SchedulerEvent, SchedulerKind, Task, TimerScheduler, DEFAULT_FRAME_PERIOD,
};
pub use sources::{ChangeSource, Collection, IndexKind, KeyComparator, KeyIndex, SourceEvent};
pub use subscriptions::{DemuxMetrics, KeyHandler, SubscriptionDemux};
pub use types::{Key, KeySet};
