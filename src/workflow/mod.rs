//! The pipeline engine: per-run context, the step contract, the runner and
//! the registry that maps job kinds to pipelines.

pub mod catalog;
pub mod context;
pub mod ledger;
pub mod pipeline;
pub mod registry;
pub mod step;

pub use catalog::{Dep, StepCatalog, StepSpec};
pub use context::{ScratchKey, WorkflowContext};
pub use ledger::StepLedger;
pub use pipeline::{MAX_RERUNS, Pipeline, PipelineRunner, RunObserver, RunSummary, StepFailure};
pub use registry::{
    PipelineFactory, PipelineSource, StepFactory, WorkflowRegistry, WorkflowRegistryBuilder,
    step_factory,
};
pub use step::Step;
