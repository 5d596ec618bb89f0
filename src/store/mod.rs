// Module: Store
// Holds the variable state threaded through a workflow execution.

use std::collections::HashMap;

use serde_json::Value;

/// Mutable variable store for a single workflow execution.
///
/// Values are dynamic JSON: scalars, lists, or nested mappings. Execution is
/// single-threaded, so the store is owned by the execution context and
/// mutated only by the step currently running.
#[derive(Debug, Default)]
pub struct Store {
    variables: HashMap<String, Value>,
}

impl Store {
    /// Creates a store seeded with the given variables, if any.
    pub fn new(initial: Option<HashMap<String, Value>>) -> Self {
        Self {
            variables: initial.unwrap_or_default(),
        }
    }

    /// Inserts or overwrites a variable.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    /// Retrieves a variable.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Bulk insert; existing keys are overwritten.
    pub fn add(&mut self, entries: HashMap<String, Value>) {
        self.variables.extend(entries);
    }

    /// Removes a variable. Removing an absent key is a no-op.
    pub fn remove(&mut self, key: &str) {
        self.variables.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.variables.contains_key(key)
    }

    /// Read view of the current variables, valid until the next mutation.
    pub fn snapshot(&self) -> &HashMap<String, Value> {
        &self.variables
    }
}
