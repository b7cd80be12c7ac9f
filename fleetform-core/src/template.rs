//! Template - Accumulator for the compiled resource graph and outputs
//!
//! Components write into a `Template` handed down by their parent. Every
//! insert checks for key collisions; nothing is ever overwritten.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};

use crate::error::{CompileError, CompileResult};
use crate::resource::{Output, Resource};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Template {
    resources: IndexMap<String, Resource>,
    outputs: IndexMap<String, Output>,
}

impl Template {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_resource(&mut self, key: impl Into<String>, resource: Resource) -> CompileResult<()> {
        let key = key.into();
        if self.resources.contains_key(&key) {
            return Err(CompileError::DuplicateResource(key));
        }
        self.resources.insert(key, resource);
        Ok(())
    }

    /// Insert a resource that several components may emit.
    /// Re-inserting an identical definition is a no-op; a different one is a collision.
    pub fn insert_shared_resource(
        &mut self,
        key: impl Into<String>,
        resource: Resource,
    ) -> CompileResult<()> {
        let key = key.into();
        match self.resources.get(&key) {
            Some(existing) if *existing == resource => Ok(()),
            Some(_) => Err(CompileError::DuplicateResource(key)),
            None => {
                self.resources.insert(key, resource);
                Ok(())
            }
        }
    }

    pub fn insert_output(&mut self, key: impl Into<String>, output: Output) -> CompileResult<()> {
        let key = key.into();
        if self.outputs.contains_key(&key) {
            return Err(CompileError::DuplicateOutput(key));
        }
        self.outputs.insert(key, output);
        Ok(())
    }

    /// Fold another template into this one, left to right
    pub fn merge(&mut self, other: Template) -> CompileResult<()> {
        for (key, resource) in other.resources {
            self.insert_resource(key, resource)?;
        }
        for (key, output) in other.outputs {
            self.insert_output(key, output)?;
        }
        Ok(())
    }

    pub fn resources(&self) -> &IndexMap<String, Resource> {
        &self.resources
    }

    pub fn outputs(&self) -> &IndexMap<String, Output> {
        &self.outputs
    }

    pub fn resource(&self, key: &str) -> Option<&Resource> {
        self.resources.get(key)
    }

    pub fn output(&self, key: &str) -> Option<&Output> {
        self.outputs.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.outputs.is_empty()
    }

    /// Render as a CloudFormation document fragment
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl Serialize for Template {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("Resources", &self.resources)?;
        map.serialize_entry("Outputs", &self.outputs)?;
        map.end()
    }
}
