//! Processor registry -- the ordered set of processors an agent runs.
//!
//! Registration happens while the agent is being set up; once the agent
//! starts serving, the registry is shared read-only behind an `Arc`.

use std::sync::Arc;

use tracing::{debug, info};

use super::Processor;
use super::settings::{ProcessorSettings, build_processor};
use crate::Message;
use crate::outcome::Outcome;

/// Errors raised while building a registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("processor name must not be empty")]
    EmptyName,

    #[error("a processor named {0:?} is already registered")]
    Duplicate(String),

    #[error("processor {name:?} has unknown kind {kind:?}")]
    UnknownKind { name: String, kind: String },
}

/// Processors in registration order, addressed by unique name.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: Vec<Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor under the name it reports.
    pub fn register(&mut self, processor: impl Processor + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(processor))
    }

    /// Register an already shared processor.
    pub fn register_arc(&mut self, processor: Arc<dyn Processor>) -> Result<(), RegistryError> {
        let name = processor.name();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.get(name).is_some() {
            return Err(RegistryError::Duplicate(name.to_owned()));
        }
        info!(processor = name, "processor registered");
        self.processors.push(processor);
        Ok(())
    }

    /// Build a processor from its settings and register it as `name`.
    pub fn register_kind(
        &mut self,
        name: &str,
        settings: &ProcessorSettings,
    ) -> Result<(), RegistryError> {
        let processor = build_processor(name, settings)?;
        self.register_arc(processor)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Processor> {
        self.processors
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Hand `msg` to every processor, one after another, in registration
    /// order. Returns each processor's name with its outcome.
    pub async fn dispatch(&self, msg: &Message) -> Vec<(String, Outcome)> {
        let mut results = Vec::with_capacity(self.processors.len());
        for processor in &self.processors {
            let outcome = processor.process(msg).await;
            debug!(processor = processor.name(), %outcome, "processor finished");
            results.push((processor.name().to_owned(), outcome));
        }
        results
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.names())
            .finish()
    }
}
