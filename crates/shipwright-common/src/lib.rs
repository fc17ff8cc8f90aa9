//! Shared domain types for the Shipwright pipeline engine.
//!
//! Nothing in this crate performs I/O. The job store, artifact stores and
//! runner in the `shipwright` crate build on these types.

pub mod artifact;
pub mod job;
pub mod result;

pub use artifact::{
    AcceptanceArtifact, ArtifactPayload, ArtifactType, BranchArtifact, ClassificationArtifact,
    ImplementationArtifact, IssueArtifact, IssueKind, PatchPlanArtifact, PlanArtifact,
    PrMetadataArtifact, PullRequestArtifact, QualityCheck, QualityCheckArtifact,
    ReviewAddressedArtifact, ReviewArtifact, ReviewFinding,
};
pub use job::{Job, JobStatus, JobType, normalize_description};
pub use result::{Outcome, StepResult};
