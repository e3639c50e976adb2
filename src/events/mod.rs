//! Generic publish/subscribe primitive.
//!
//! Every component in the pipeline exposes its own events through an
//! [`EventBus`] instantiated with a concrete event enum, so there is no
//! run-time type inspection anywhere. Handlers are `Arc` closures; a
//! handler's identity is its `Arc` allocation, which makes registration
//! idempotent and removal O(1).

mod bucket;
mod bus;

pub use bus::{handler_id, Callback, EventBus, HandlerId};

pub(crate) use bus::invoke_isolated;
