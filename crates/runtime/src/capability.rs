//! Pluggable side-effect providers. Concrete search, enrichment, drafting and
//! channel integrations register here by name; workflow steps reference the
//! names and treat every payload as opaque JSON.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use leadflow_core::domain::workflow::WorkflowDefinition;
use leadflow_core::errors::StepError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapabilityKind {
    /// Pure side effects within the pipeline (scouting, enrichment, drafting).
    Action,
    /// Outbound message delivery; always routed through the dispatcher.
    Send,
    /// Reply-intent classification for text the keyword matcher cannot place.
    Classify,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<CapabilityError> for StepError {
    fn from(error: CapabilityError) -> Self {
        match error {
            CapabilityError::Transient(message) => StepError::Transient(message),
            CapabilityError::Fatal(message) => StepError::Fatal(message),
        }
    }
}

#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> CapabilityKind;
    async fn invoke(&self, input: Value) -> Result<Value, CapabilityError>;
}

#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn register<C>(&mut self, capability: C)
    where
        C: Capability + 'static,
    {
        self.capabilities.insert(capability.name().to_string(), Arc::new(capability));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Capability names a definition references but nothing has registered.
    /// Checked at supervisor start so misconfigured workflows fail before any
    /// step runs.
    pub fn missing_capabilities(&self, definition: &WorkflowDefinition) -> Vec<String> {
        definition
            .steps
            .iter()
            .filter(|step| !self.capabilities.contains_key(&step.capability))
            .map(|step| step.capability.clone())
            .collect()
    }
}
