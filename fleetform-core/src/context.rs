//! Context - Immutable state shared by every component of one compile

use indexmap::IndexMap;

use crate::naming::{Naming, normalize_service_prefix};
use crate::resource::Value;

/// Host-supplied settings, injected top-down into every component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileContext {
    stage: String,
    service_prefix: String,
    naming: Naming,
}

impl CompileContext {
    /// `service` is the raw host service name; it is normalized into the naming prefix
    pub fn new(stage: impl Into<String>, service: &str) -> Self {
        let stage = stage.into();
        let naming = Naming::new(&stage);
        Self {
            stage,
            service_prefix: normalize_service_prefix(service),
            naming,
        }
    }

    /// Raw deploy stage, as written in log group paths
    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn service_prefix(&self) -> &str {
        &self.service_prefix
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }
}

/// Resource tags of one cluster, in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tags {
    entries: Vec<(String, Value)>,
}

impl Tags {
    pub fn from_spec(tags: &IndexMap<String, serde_json::Value>) -> Self {
        let entries = tags
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => Value::String(s.clone()),
                    serde_json::Value::Number(n) => Value::String(n.to_string()),
                    serde_json::Value::Bool(b) => Value::String(b.to_string()),
                    other => Value::from_input(other),
                };
                (key.clone(), value)
            })
            .collect();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// CloudFormation tag list `[{Key, Value}]`, or None when there are no tags
    pub fn to_value(&self) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        Some(Value::list(self.entries.iter().map(|(key, value)| {
            Value::map([("Key", Value::from(key)), ("Value", value.clone())])
        })))
    }
}
