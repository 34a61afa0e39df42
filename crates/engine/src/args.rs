//! Invocation arguments.
//!
//! Callers supply argument values by parameter name; bindings declared on the
//! method descriptor decide where each value lands (path, query, header,
//! cookie, or body). A `null` value counts as absent for header bindings so
//! header rules can take over.

use indexmap::IndexMap;
use serde_json::Value;

/// Named argument values for one invocation.
#[derive(Clone, Debug, Default)]
pub struct Args {
    values: IndexMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Present and non-null.
    pub fn has(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(value) if !value.is_null())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Render an argument value for the wire: strings pass through unquoted,
/// everything else uses its JSON form.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Expand an argument into one or more wire values; arrays contribute one
/// value per element.
pub fn value_to_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(value_to_string).collect(),
        other => vec![value_to_string(other)],
    }
}
