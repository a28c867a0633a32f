use std::collections::HashMap;
use thiserror::Error;

use crate::{
    schema_version::SchemaVersion,
    steps::default_steps,
    transformation_step::TransformationStep,
};

/// Registry mapping each consecutive version pair to its step
pub struct StepRegistry {
    steps: HashMap<(SchemaVersion, SchemaVersion), TransformationStep>,
}

/// Integrity errors; these mean the registry is broken, not the document.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No transformation step registered from {0} to {1}")]
    StepNotFound(SchemaVersion, SchemaVersion),

    #[error("A step from {0} to {1} is already registered")]
    DuplicateStep(SchemaVersion, SchemaVersion),

    #[error("Step {name} must go from one version to the next, not {from} to {to}")]
    InvalidStep {
        name: String,
        from: SchemaVersion,
        to: SchemaVersion,
    },
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
        }
    }

    /// Registry holding the complete built-in chain
    pub fn with_default_steps() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for step in default_steps() {
            registry.register(step)?;
        }
        Ok(registry)
    }

    /// Add a step; each version pair can be registered once.
    pub fn register(&mut self, step: TransformationStep) -> Result<(), RegistryError> {
        if step.to.value() != step.from.value() + 1 {
            return Err(RegistryError::InvalidStep {
                name: step.name.to_string(),
                from: step.from,
                to: step.to,
            });
        }
        let key = (step.from, step.to);
        if self.steps.contains_key(&key) {
            return Err(RegistryError::DuplicateStep(step.from, step.to));
        }
        self.steps.insert(key, step);
        Ok(())
    }

    pub fn get_step(
        &self,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<&TransformationStep, RegistryError> {
        self.steps
            .get(&(from, to))
            .ok_or(RegistryError::StepNotFound(from, to))
    }

    /// Highest version any registered step produces
    pub fn latest_version(&self) -> Option<SchemaVersion> {
        self.steps.keys().map(|(_, to)| *to).max()
    }

    /// Versions in `1..=target` that no step reaches.
    pub fn missing_steps(&self, target: SchemaVersion) -> Vec<SchemaVersion> {
        (1..=target.value())
            .map(SchemaVersion::new)
            .filter(|to| {
                let from = SchemaVersion::new(to.value() - 1);
                !self.steps.contains_key(&(from, *to))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
