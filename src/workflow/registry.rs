//! Maps workflow type identifiers to pipelines.
//!
//! Registration happens on a [`WorkflowRegistryBuilder`]; `build` freezes it
//! into an immutable [`WorkflowRegistry`] that is shared by `Arc` with
//! whatever constructs runners.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::pipeline::Pipeline;
use super::step::Step;
use crate::errors::RegistryError;

/// Constructs one fresh step instance.
pub type StepFactory = Arc<dyn Fn() -> Box<dyn Step> + Send + Sync>;

/// Computes a step list at resolution time.
pub type PipelineFactory = Arc<dyn Fn() -> Vec<Box<dyn Step>> + Send + Sync>;

#[derive(Clone)]
pub enum PipelineSource {
    Static(Vec<StepFactory>),
    Dynamic(PipelineFactory),
}

impl PipelineSource {
    fn build_steps(&self) -> Vec<Box<dyn Step>> {
        match self {
            Self::Static(factories) => factories.iter().map(|f| f()).collect(),
            Self::Dynamic(factory) => factory(),
        }
    }
}

/// Wrap a closure as a [`StepFactory`].
pub fn step_factory<F, S>(f: F) -> StepFactory
where
    F: Fn() -> S + Send + Sync + 'static,
    S: Step + 'static,
{
    Arc::new(move || Box::new(f()) as Box<dyn Step>)
}

#[derive(Clone)]
struct Entry {
    description: String,
    source: PipelineSource,
}

#[derive(Default)]
pub struct WorkflowRegistryBuilder {
    entries: BTreeMap<String, Entry>,
}

impl WorkflowRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        mut self,
        type_id: impl Into<String>,
        description: impl Into<String>,
        source: PipelineSource,
    ) -> Result<Self, RegistryError> {
        let type_id = type_id.into();
        if self.entries.contains_key(&type_id) {
            return Err(RegistryError::DuplicateWorkflowType(type_id));
        }
        self.entries.insert(
            type_id,
            Entry {
                description: description.into(),
                source,
            },
        );
        Ok(self)
    }

    pub fn build(self) -> WorkflowRegistry {
        WorkflowRegistry {
            entries: self.entries,
        }
    }
}

/// Read-only after construction.
pub struct WorkflowRegistry {
    entries: BTreeMap<String, Entry>,
}

impl WorkflowRegistry {
    pub fn builder() -> WorkflowRegistryBuilder {
        WorkflowRegistryBuilder::new()
    }

    /// Build a fresh pipeline for `type_id`.
    pub fn resolve(&self, type_id: &str) -> Result<Pipeline, RegistryError> {
        let entry = self
            .entries
            .get(type_id)
            .ok_or_else(|| RegistryError::UnknownWorkflowType {
                requested: type_id.to_string(),
                known: self.list_types(),
            })?;
        Pipeline::new(entry.source.build_steps())
    }

    /// Registered type identifiers, sorted.
    pub fn list_types(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn description(&self, type_id: &str) -> Option<&str> {
        self.entries.get(type_id).map(|e| e.description.as_str())
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.entries.contains_key(type_id)
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("types", &self.list_types())
            .finish()
    }
}
