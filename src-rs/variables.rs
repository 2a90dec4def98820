use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Variable bindings remembered between submissions (`x -> "5"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableContext {
    bindings: BTreeMap<String, String>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `symbol`, replacing any previous value. Returns the old value.
    pub fn bind(&mut self, symbol: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.bindings.insert(symbol.into(), value.into())
    }

    pub fn get(&self, symbol: &str) -> Option<&str> {
        self.bindings.get(symbol).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
