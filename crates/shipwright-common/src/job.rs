use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a backlog job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Started,
    Completed,
    PatchPending,
    Patched,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        Self::Pending,
        Self::Started,
        Self::Completed,
        Self::PatchPending,
        Self::Patched,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::PatchPending => "patch_pending",
            Self::Patched => "patched",
            Self::Failed => "failed",
        }
    }

    /// Whether a worker may claim a job in this status.
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::PatchPending)
    }

    /// Whether the job has reached the end of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Patched | Self::Failed)
    }

    /// Allowed lifecycle edges.
    ///
    /// Forward progress is monotonic. The only backward edges are the
    /// explicit ones: re-queueing a finished job as a patch, retrying a
    /// failed job, and releasing a started job back to its queue (graceful
    /// shutdown or stale reclaim).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Pending, Started) | (PatchPending, Started) => true,
            (Started, Completed | Patched | Failed) => true,
            (Started, Pending | PatchPending) => true,
            (Completed | Patched | Failed, PatchPending) => true,
            (Failed, Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "patch_pending" | "patch-pending" | "patch pending" => Ok(Self::PatchPending),
            "patched" => Ok(Self::Patched),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Selects which workflow definition applies to a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Main,
    Patch,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Patch => "patch",
        }
    }

    /// Workflow registry key used for jobs of this type.
    pub fn workflow_type(&self) -> &'static str {
        self.as_str()
    }

    /// Status a job of this type waits in before it is claimed.
    pub fn queued_status(&self) -> JobStatus {
        match self {
            Self::Main => JobStatus::Pending,
            Self::Patch => JobStatus::PatchPending,
        }
    }

    /// Status a job of this type ends in after a successful run.
    pub fn success_status(&self) -> JobStatus {
        match self {
            Self::Main => JobStatus::Completed,
            Self::Patch => JobStatus::Patched,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Self::Main),
            "patch" => Ok(Self::Patch),
            _ => Err(format!("Invalid job type: {}", s)),
        }
    }
}

/// A unit of backlog work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: i64,
    pub description: String,
    pub status: JobStatus,
    pub job_type: JobType,
    pub assigned_to: Option<String>,
    pub run_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Job {
    /// First line of the description, used for branch names and PR titles.
    pub fn title(&self) -> &str {
        self.description
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or(&self.description)
    }
}

/// Trim a job description, rejecting one that is empty afterwards.
pub fn normalize_description(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
