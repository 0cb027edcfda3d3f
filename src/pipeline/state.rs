//! The accumulating key-value payload threaded through a job's stages.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StageError, StageResult};

/// Shared pipeline state: a JSON object of named fields.
///
/// Stages never mutate the state they are handed. They return a partial state
/// that the orchestrator merges with [`merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineState(Map<String, Value>);

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a raw value.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Serializes `value` into the field `key`.
    pub fn put<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> StageResult<()> {
        self.0.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Reads and deserializes a field that must be present.
    ///
    /// # Errors
    ///
    /// `MissingInput` if the field is absent or null, `InvalidInput` if it
    /// does not deserialize as `T`.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> StageResult<T> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(StageError::MissingInput(key.to_string())),
            Some(value) => decode(key, value),
        }
    }

    /// Reads and deserializes a field that may be absent.
    pub fn optional<T: DeserializeOwned>(&self, key: &str) -> StageResult<Option<T>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => decode(key, value).map(Some),
        }
    }

    /// Merges `partial` into this state in place. Keys in `partial` win.
    pub fn merge_in(&mut self, partial: PipelineState) {
        for (key, value) in partial.0 {
            self.0.insert(key, value);
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: &Value) -> StageResult<T> {
    T::deserialize(value).map_err(|e| StageError::invalid(key, e.to_string()))
}

/// Shallow last-writer-wins merge. Neither input is modified.
pub fn merge(current: &PipelineState, partial: &PipelineState) -> PipelineState {
    let mut next = current.clone();
    next.merge_in(partial.clone());
    next
}
