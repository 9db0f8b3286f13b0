use std::collections::HashMap;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::BatchError;

/// Key-value snapshot of resumable state.
///
/// One context is persisted per job execution and one per step execution. Readers
/// and writers store their position here so that a restart can resume where the
/// previous execution stopped. Any mutation marks the context dirty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(flatten)]
    entries: HashMap<String, Value>,
    #[serde(skip)]
    dirty: bool,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if self.entries.get(key) != Some(&value) {
            self.entries.insert(key.to_string(), value);
            self.dirty = true;
        }
    }

    /// Stores any serializable value.
    pub fn put_serialized<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), BatchError> {
        let value = serde_json::to_value(value)?;
        self.put(key, value);
        Ok(())
    }

    pub fn put_string(&mut self, key: &str, value: &str) {
        self.put(key, value);
    }

    pub fn put_long(&mut self, key: &str, value: i64) {
        self.put(key, value);
    }

    pub fn put_double(&mut self, key: &str, value: f64) {
        self.put(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn get_long(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(Value::as_i64)
    }

    pub fn get_double(&self, key: &str) -> Option<f64> {
        self.entries.get(key).and_then(Value::as_f64)
    }

    pub fn get_deserialized<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BatchError> {
        self.entries
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(BatchError::from)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty_flag(&mut self) {
        self.dirty = false;
    }

    pub fn to_json(&self) -> Result<String, BatchError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, BatchError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl PartialEq for ExecutionContext {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}
