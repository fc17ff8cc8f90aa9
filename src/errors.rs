//! Typed error hierarchy for Shipwright.
//!
//! One enum per subsystem:
//! - `JobStoreError`: backlog persistence and the claim primitive
//! - `ArtifactError`: per-run artifact persistence
//! - `PipelineError`: runner aborts
//! - `RegistryError`: workflow registration and lookup
//! - `CatalogError`: step dependency resolution
//! - `AgentError`: external coding-agent invocations

use shipwright_common::{ArtifactType, JobStatus};
use thiserror::Error;

/// Errors from the job store.
#[derive(Debug, Error)]
pub enum JobStoreError {
    /// The database could not be opened, locked or queried. Transient: the
    /// caller retries with backoff and must not fail the job over it.
    #[error("Job store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    #[error("Job {id} not found")]
    JobNotFound { id: i64 },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Corrupt job row: {0}")]
    CorruptRow(String),
}

impl JobStoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors from an artifact store.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact '{artifact_type}' not found for run {run_id}")]
    NotFound {
        run_id: String,
        artifact_type: ArtifactType,
    },

    #[error("Artifact '{artifact_type}' for run {run_id} is corrupt: {reason}")]
    Corrupt {
        run_id: String,
        artifact_type: ArtifactType,
        reason: String,
    },

    #[error("Artifact storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Invalid run id '{0}': expected letters, digits, '-' or '_'")]
    InvalidRunId(String),
}

/// Reasons the runner aborts a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Critical step '{step}' failed: {error}")]
    CriticalStepFailed { step: String, error: String },

    #[error("Rerun limit of {limit} exceeded at step '{step}'")]
    RerunLimitExceeded { step: String, limit: u32 },

    #[error("Step '{step}' requested rerun from unknown step '{target}'")]
    UnknownRerunTarget { step: String, target: String },

    #[error("Step '{step}' requested rerun from '{target}', which comes after it")]
    ForwardRerunTarget { step: String, target: String },

    #[error("Unknown step '{name}'. Available: {}", .known.join(", "))]
    UnknownStep { name: String, known: Vec<String> },

    #[error("Storage outage during step '{step}': {source}")]
    StoreUnavailable {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Workflow timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Errors from building or querying the workflow registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown workflow type: {requested}. Available: {}", .known.join(", "))]
    UnknownWorkflowType {
        requested: String,
        known: Vec<String>,
    },

    #[error("Workflow type '{0}' registered twice")]
    DuplicateWorkflowType(String),

    #[error("Step '{0}' appears twice in one pipeline")]
    DuplicateStepName(String),

    #[error("Step '{step}' may rerun from '{target}', which does not precede it")]
    InvalidDeclaredRerunTarget { step: String, target: String },
}

/// Errors from the step catalog's dependency resolution.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Unknown step '{name}'. Available: {}", .known.join(", "))]
    UnknownStep { name: String, known: Vec<String> },

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("Step '{step}' needs '{artifact}' but no step produces it")]
    MissingProducer {
        step: String,
        artifact: ArtifactType,
    },
}

/// Errors from invoking an external coding agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to spawn agent '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Agent timed out after {secs}s")]
    TimedOut { secs: u64 },

    #[error("Agent exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Agent produced unusable output: {0}")]
    InvalidOutput(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Whether an error chain bottoms out in a job-store or artifact-store outage.
pub fn is_store_outage(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ArtifactError>(),
            Some(ArtifactError::Storage(_))
        ) || matches!(
            cause.downcast_ref::<JobStoreError>(),
            Some(JobStoreError::Unavailable(_))
        )
    })
}
