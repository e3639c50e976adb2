//! Primary-key entity collection with merge-on-upsert.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::events::EventBus;
use crate::types::Key;

use super::{ChangeSource, SourceEvent};

/// Keyed entity store over JSON values.
///
/// Every record carries its own primary key in a configurable id field
/// (`"id"` by default); a record the key cannot be derived from is rejected
/// synchronously, before anything is written. Upserting over an existing
/// object record shallow-merges the incoming fields; a merge that leaves the
/// stored value unchanged emits nothing.
pub struct Collection {
    name: String,
    key_field: String,
    records: RwLock<HashMap<Key, Value>>,
    changes: Arc<EventBus<SourceEvent, Vec<Key>>>,
}

impl Collection {
    /// A collection keyed by the `"id"` field.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_key_field(name, "id")
    }

    /// A collection keyed by a custom field.
    pub fn with_key_field(name: impl Into<String>, key_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_field: key_field.into(),
            records: RwLock::new(HashMap::new()),
            changes: Arc::new(EventBus::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Derive the primary key of `record`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::MissingPrimaryKey`] when the id field is absent (or
    /// the record is not an object); [`PipelineError::InvalidPrimaryKey`]
    /// when the field holds something other than a string or integer.
    pub fn key_of(&self, record: &Value) -> Result<Key> {
        match record.get(&self.key_field) {
            Some(Value::String(s)) => Ok(Key::Str(s.clone())),
            Some(Value::Number(n)) => {
                n.as_i64()
                    .map(Key::Int)
                    .ok_or_else(|| PipelineError::InvalidPrimaryKey {
                        field: self.key_field.clone(),
                        got: n.to_string(),
                    })
            }
            Some(other) => Err(PipelineError::InvalidPrimaryKey {
                field: self.key_field.clone(),
                got: value_kind(other).to_string(),
            }),
            None => Err(PipelineError::MissingPrimaryKey(self.key_field.clone())),
        }
    }

    /// Insert or merge one record, returning its key.
    ///
    /// Emits a single-key change batch unless the write was a no-op.
    pub fn upsert(&self, record: Value) -> Result<Key> {
        let key = self.key_of(&record)?;
        let changed = {
            let mut records = self.records.write();
            apply_upsert(&mut records, key.clone(), record)
        };
        if changed {
            self.changes.emit(&SourceEvent::Changed, &vec![key.clone()]);
        }
        Ok(key)
    }

    /// Insert or merge a batch of records, returning their keys.
    ///
    /// Keys are derived for the whole batch before anything is written, so
    /// a bad record fails the call without partial effects. All actually
    /// changed keys are announced in one batch.
    pub fn upsert_many(&self, batch: Vec<Value>) -> Result<Vec<Key>> {
        let keys = batch
            .iter()
            .map(|record| self.key_of(record))
            .collect::<Result<Vec<Key>>>()?;

        let changed: Vec<Key> = {
            let mut records = self.records.write();
            keys.iter()
                .zip(batch)
                .filter_map(|(key, record)| {
                    apply_upsert(&mut records, key.clone(), record).then(|| key.clone())
                })
                .collect()
        };
        if !changed.is_empty() {
            self.changes.emit(&SourceEvent::Changed, &changed);
        }
        Ok(keys)
    }

    /// Remove a record. Emits the key if something was actually removed.
    pub fn remove(&self, key: &Key) -> bool {
        let removed = self.records.write().remove(key).is_some();
        if removed {
            self.changes.emit(&SourceEvent::Changed, &vec![key.clone()]);
        }
        removed
    }

    /// Snapshot of a record's current value.
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.records.read().get(key).cloned()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.records.read().contains_key(key)
    }

    /// Snapshot of all primary keys (unordered).
    pub fn keys(&self) -> Vec<Key> {
        self.records.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl ChangeSource for Collection {
    fn changes(&self) -> &Arc<EventBus<SourceEvent, Vec<Key>>> {
        &self.changes
    }
}

/// Write one record, merging into an existing object. Returns whether the
/// stored value actually changed.
fn apply_upsert(records: &mut HashMap<Key, Value>, key: Key, incoming: Value) -> bool {
    match records.get_mut(&key) {
        Some(existing) => {
            let merged = merge_records(existing, incoming);
            if merged == *existing {
                false
            } else {
                *existing = merged;
                true
            }
        }
        None => {
            records.insert(key, incoming);
            true
        }
    }
}

/// Shallow merge: incoming object fields override existing ones; any
/// non-object pairing replaces wholesale.
fn merge_records(existing: &Value, incoming: Value) -> Value {
    match (existing, incoming) {
        (Value::Object(old), Value::Object(new)) => {
            let mut merged = old.clone();
            for (field, value) in new {
                merged.insert(field, value);
            }
            Value::Object(merged)
        }
        (_, incoming) => incoming,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
