//! The function registry: catalog of everything the model may call.
//!
//! The orchestration loop uses this to:
//! 1. Get function definitions to send to the model
//! 2. Look up handlers when the model requests a call
//!
//! Built once at startup, then shared read-only (behind an `Arc`) by every
//! session. A definition is only ever stored together with its handler, so
//! nothing unexecutable is advertised to the model.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::error::RegistryError;
use crate::function::FunctionHandler;
use crate::schema::FunctionDefinition;

struct Entry {
    definition: FunctionDefinition,
    handler: Arc<dyn FunctionHandler>,
}

/// Name → (definition, handler), iterated in registration order.
#[derive(Default)]
pub struct FunctionRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function. Fails if the name is already taken.
    pub fn register(
        &mut self,
        definition: FunctionDefinition,
        handler: Arc<dyn FunctionHandler>,
    ) -> Result<(), RegistryError> {
        if definition.name.trim().is_empty() {
            return Err(RegistryError::InvalidDefinition(
                "function name must not be empty".into(),
            ));
        }
        if self.index.contains_key(&definition.name) {
            return Err(RegistryError::DuplicateName(definition.name));
        }

        info!(function = %definition.name, "Function registered");
        self.index.insert(definition.name.clone(), self.entries.len());
        self.entries.push(Entry {
            definition,
            handler,
        });
        Ok(())
    }

    /// Register from a tool-calling JSON schema plus its handler.
    pub fn register_schema(
        &mut self,
        schema: &serde_json::Value,
        handler: Arc<dyn FunctionHandler>,
    ) -> Result<(), RegistryError> {
        let definition = FunctionDefinition::from_tool_schema(schema)?;
        self.register(definition, handler)
    }

    /// All definitions in insertion order (for sending to the model).
    pub fn list_definitions(&self) -> Vec<FunctionDefinition> {
        self.entries.iter().map(|e| e.definition.clone()).collect()
    }

    pub fn get_definition(&self, name: &str) -> Result<&FunctionDefinition, RegistryError> {
        self.entry(name).map(|e| &e.definition)
    }

    pub fn get_handler(&self, name: &str) -> Result<Arc<dyn FunctionHandler>, RegistryError> {
        self.entry(name).map(|e| Arc::clone(&e.handler))
    }

    /// Registered names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.definition.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, name: &str) -> Result<&Entry, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| RegistryError::UnknownFunction(name.to_string()))
    }
}
