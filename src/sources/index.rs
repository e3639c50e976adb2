//! Secondary indexes: index key to primary keys.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::events::EventBus;
use crate::types::{Key, KeySet};

use super::{ChangeSource, SourceEvent};

/// Shape of an index entry's value list.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IndexKind {
    /// Deduplicated, insertion-ordered primary keys.
    Set,
    /// Primary keys as given, duplicates preserved.
    Array,
}

/// Equality policy used to suppress no-op index updates.
///
/// `equal(old, new)` returning true means the write is skipped and no
/// change is announced.
#[derive(Clone)]
pub enum KeyComparator {
    /// Same elements in the same order.
    Elementwise,
    /// Same elements regardless of order or multiplicity.
    SetWise,
    /// Never equal: every write announces a change.
    Always,
    /// Caller-supplied policy.
    Custom(Arc<dyn Fn(&[Key], &[Key]) -> bool + Send + Sync>),
}

impl KeyComparator {
    pub fn equal(&self, old: &[Key], new: &[Key]) -> bool {
        match self {
            KeyComparator::Elementwise => old == new,
            KeyComparator::SetWise => {
                let old: HashSet<&Key> = old.iter().collect();
                let new: HashSet<&Key> = new.iter().collect();
                old == new
            }
            KeyComparator::Always => false,
            KeyComparator::Custom(equal) => equal(old, new),
        }
    }
}

impl fmt::Debug for KeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyComparator::Elementwise => "Elementwise",
            KeyComparator::SetWise => "SetWise",
            KeyComparator::Always => "Always",
            KeyComparator::Custom(_) => "Custom",
        };
        write!(f, "KeyComparator::{}", name)
    }
}

/// Index mapping index keys to lists of primary keys.
///
/// Mutations announce the affected index key on the source bus; reads
/// return snapshots. Set-shaped entries are normalized through [`KeySet`]
/// on every write.
pub struct KeyIndex {
    name: String,
    kind: IndexKind,
    comparator: KeyComparator,
    entries: RwLock<HashMap<Key, Vec<Key>>>,
    changes: Arc<EventBus<SourceEvent, Vec<Key>>>,
}

impl KeyIndex {
    /// An index with elementwise update suppression.
    pub fn new(name: impl Into<String>, kind: IndexKind) -> Self {
        Self::with_comparator(name, kind, KeyComparator::Elementwise)
    }

    /// An index with a custom update-suppression policy.
    pub fn with_comparator(
        name: impl Into<String>,
        kind: IndexKind,
        comparator: KeyComparator,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            comparator,
            entries: RwLock::new(HashMap::new()),
            changes: Arc::new(EventBus::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Replace the entry under `key` with `values`.
    ///
    /// If the comparator deems the (normalized) new values equal to the
    /// current ones, nothing is written and nothing is announced. A missing
    /// entry compares as an empty list.
    pub fn set(&self, key: impl Into<Key>, values: Vec<Key>) {
        let key = key.into();
        let values = self.normalize(values);
        let changed = {
            let mut entries = self.entries.write();
            let equal = {
                let current = entries.get(&key).map(|v| v.as_slice()).unwrap_or(&[]);
                self.comparator.equal(current, &values)
            };
            if equal {
                false
            } else {
                entries.insert(key.clone(), values);
                true
            }
        };
        if changed {
            self.changes.emit(&SourceEvent::Changed, &vec![key]);
        }
    }

    /// Append one primary key to the entry under `key`.
    ///
    /// For a `Set` index an already-present value is a silent no-op.
    pub fn add(&self, key: impl Into<Key>, value: Key) {
        let key = key.into();
        let changed = {
            let mut entries = self.entries.write();
            let entry = entries.entry(key.clone()).or_default();
            if self.kind == IndexKind::Set && entry.contains(&value) {
                false
            } else {
                entry.push(value);
                true
            }
        };
        if changed {
            self.changes.emit(&SourceEvent::Changed, &vec![key]);
        }
    }

    /// Drop the entry under `key`. Announces the key if it existed.
    pub fn delete(&self, key: &Key) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            self.changes.emit(&SourceEvent::Changed, &vec![key.clone()]);
        }
        removed
    }

    /// Snapshot of the primary keys under `key` (empty when absent).
    pub fn get(&self, key: &Key) -> Vec<Key> {
        self.entries.read().get(key).cloned().unwrap_or_default()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Snapshot of all index keys (unordered).
    pub fn keys(&self) -> Vec<Key> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn normalize(&self, values: Vec<Key>) -> Vec<Key> {
        match self.kind {
            IndexKind::Array => values,
            IndexKind::Set => KeySet::from(values).to_vec(),
        }
    }
}

impl ChangeSource for KeyIndex {
    fn changes(&self) -> &Arc<EventBus<SourceEvent, Vec<Key>>> {
        &self.changes
    }
}
