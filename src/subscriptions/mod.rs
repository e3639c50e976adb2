//! Per-key subscriptions over coalesced change cycles.
//!
//! [`SubscriptionDemux`] is the fan-out layer: callers subscribe a handler
//! to one or many keys, and after each flush cycle every handler whose keys
//! changed is invoked exactly once with the changed-key snapshot.
//!
//! # Example
//!
//! ```ignore
//! let demux = SubscriptionDemux::new(coalescer, queue);
//!
//! let handler: KeyHandler = Arc::new(|changed| {
//!     println!("changed keys: {:?}", changed);
//! });
//! demux.subscribe_on_keys(&[Key::from("user-1"), Key::from("user-2")], handler);
//! ```

mod demux;

pub use demux::{DemuxMetrics, KeyHandler, SubscriptionDemux};
