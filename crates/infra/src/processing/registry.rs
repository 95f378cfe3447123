use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::error::ProcessorError;
use super::processor::EventProcessor;
use super::status::ProcessorStatus;

/// Process-wide registry of event processors, keyed by name.
///
/// Built once at startup and handed to whoever needs it (the API holds it in
/// an axum `Extension`).
#[derive(Debug, Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<String, Arc<EventProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor. Names must be unique.
    pub fn register(&mut self, processor: Arc<EventProcessor>) -> Result<(), ProcessorError> {
        let name = processor.name().to_string();
        if self.processors.contains_key(&name) {
            return Err(ProcessorError::Validation(format!(
                "processor '{name}' is already registered"
            )));
        }
        self.processors.insert(name, processor);
        Ok(())
    }

    pub fn with(mut self, processor: Arc<EventProcessor>) -> Result<Self, ProcessorError> {
        self.register(processor)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<EventProcessor>, ProcessorError> {
        self.processors
            .get(name)
            .ok_or_else(|| ProcessorError::UnknownProcessor(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.processors.keys().map(String::as_str)
    }

    /// Status of every processor; never fails.
    pub fn list_status(&self) -> Vec<ProcessorStatus> {
        self.processors.values().map(|p| p.status()).collect()
    }

    pub fn start_all(&self) -> Result<(), ProcessorError> {
        for processor in self.processors.values() {
            processor.start()?;
        }
        Ok(())
    }

    /// Shut every processor down, continuing past failures.
    pub fn shutdown_all(&self) {
        for processor in self.processors.values() {
            if let Err(err) = processor.shutdown() {
                warn!(processor = processor.name(), error = %err, "processor shutdown failed");
            }
        }
    }
}
