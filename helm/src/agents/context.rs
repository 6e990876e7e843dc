//! Collaboration context: the key→value shared memory handed to agents,
//! scoped to one mission run.

use std::collections::BTreeMap;

use serde_json::Value;

/// Mutable view over the run's shared memory. Agents read what earlier
/// nodes left and publish their own keys; the engine folds the map back
/// into the graph state after each node.
#[derive(Clone, Debug, Default)]
pub struct CollabContext {
    memory: BTreeMap<String, Value>,
}

impl CollabContext {
    pub fn from_memory(memory: BTreeMap<String, Value>) -> Self {
        Self { memory }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.memory.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.memory.get(key).and_then(Value::as_str)
    }

    pub fn update(&mut self, key: impl Into<String>, value: Value) {
        self.memory.insert(key.into(), value);
    }

    pub fn into_memory(self) -> BTreeMap<String, Value> {
        self.memory
    }
}
