//! Mutation sources: keyed stores that report which keys changed.
//!
//! A source owns its data, mutates it, and emits one raw
//! [`SourceEvent::Changed`] batch per mutation on its own bus. The pipeline
//! never caches source values; consumers read back through the source's
//! accessors after being notified.

mod collection;
mod index;

pub use collection::Collection;
pub use index::{IndexKind, KeyComparator, KeyIndex};

use std::sync::Arc;

use crate::events::EventBus;
use crate::types::Key;

/// Raw change events emitted by a source.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SourceEvent {
    /// These keys changed; payload is the batch of affected keys.
    Changed,
}

/// Anything that owns keyed data and announces mutations.
pub trait ChangeSource {
    /// The bus carrying this source's raw change batches.
    fn changes(&self) -> &Arc<EventBus<SourceEvent, Vec<Key>>>;
}
