//! Artifact type tags and the typed payloads stored under them.
//!
//! Every payload implements [`ArtifactPayload`], binding it to exactly one
//! [`ArtifactType`]. Stores and the workflow context are generic over the
//! payload, so asking for a plan always yields a `PlanArtifact`.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::job::Job;

/// Closed set of artifact kinds a run can hold, one entry per kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Issue,
    Branch,
    Classification,
    Plan,
    PatchPlan,
    Implementation,
    Review,
    ReviewAddressed,
    QualityCheck,
    Acceptance,
    PrMetadata,
    PullRequest,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 12] = [
        Self::Issue,
        Self::Branch,
        Self::Classification,
        Self::Plan,
        Self::PatchPlan,
        Self::Implementation,
        Self::Review,
        Self::ReviewAddressed,
        Self::QualityCheck,
        Self::Acceptance,
        Self::PrMetadata,
        Self::PullRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Branch => "branch",
            Self::Classification => "classification",
            Self::Plan => "plan",
            Self::PatchPlan => "patch_plan",
            Self::Implementation => "implementation",
            Self::Review => "review",
            Self::ReviewAddressed => "review_addressed",
            Self::QualityCheck => "quality_check",
            Self::Acceptance => "acceptance",
            Self::PrMetadata => "pr_metadata",
            Self::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Invalid artifact type: {}", s))
    }
}

/// A payload that can be persisted as an artifact.
pub trait ArtifactPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: ArtifactType;
}

macro_rules! artifact_payload {
    ($ty:ty => $tag:ident) => {
        impl ArtifactPayload for $ty {
            const TYPE: ArtifactType = ArtifactType::$tag;
        }
    };
}

/// Snapshot of the job as fetched at the start of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueArtifact {
    pub job: Job,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchArtifact {
    pub name: String,
    pub base: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    #[default]
    Feature,
    Bug,
    Chore,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Chore => "chore",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassificationArtifact {
    pub kind: IssueKind,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanArtifact {
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchPlanArtifact {
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<String>,
    /// Run whose plan this patch builds on, if it was available.
    #[serde(default)]
    pub parent_run_id: Option<String>,
    #[serde(default)]
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImplementationArtifact {
    pub summary: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewFinding {
    pub severity: String,
    #[serde(default)]
    pub file: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewArtifact {
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<ReviewFinding>,
}

impl ReviewArtifact {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewAddressedArtifact {
    /// Review round this fix pass belongs to, starting at 1.
    pub iteration: u32,
    pub addressed: usize,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityCheck {
    pub command: String,
    pub passed: bool,
    #[serde(default)]
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityCheckArtifact {
    pub checks: Vec<QualityCheck>,
}

impl QualityCheckArtifact {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcceptanceArtifact {
    pub accepted: bool,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrMetadataArtifact {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PullRequestArtifact {
    pub url: String,
    pub platform: String,
}

artifact_payload!(IssueArtifact => Issue);
artifact_payload!(BranchArtifact => Branch);
artifact_payload!(ClassificationArtifact => Classification);
artifact_payload!(PlanArtifact => Plan);
artifact_payload!(PatchPlanArtifact => PatchPlan);
artifact_payload!(ImplementationArtifact => Implementation);
artifact_payload!(ReviewArtifact => Review);
artifact_payload!(ReviewAddressedArtifact => ReviewAddressed);
artifact_payload!(QualityCheckArtifact => QualityCheck);
artifact_payload!(AcceptanceArtifact => Acceptance);
artifact_payload!(PrMetadataArtifact => PrMetadata);
artifact_payload!(PullRequestArtifact => PullRequest);
