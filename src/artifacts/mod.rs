//! Per-run artifact persistence.
//!
//! A run owns one namespace; inside it each [`ArtifactType`] maps to exactly
//! one whole value. Writing the same type again replaces the previous value.
//! Two backends implement [`ArtifactStore`]: a SQLite table sharing the job
//! database file, and a directory tree of JSON files.

pub mod files;
pub mod sqlite;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shipwright_common::{ArtifactPayload, ArtifactType};

use crate::errors::ArtifactError;
use crate::util::is_valid_run_id;

pub use files::FileArtifactStore;
pub use sqlite::SqliteArtifactStore;

/// What a backend actually persists for one artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredArtifact {
    pub workflow_run_id: String,
    pub artifact_type: ArtifactType,
    pub created_at: String,
    /// SHA-256 of the compact JSON encoding of `payload`
    pub checksum: String,
    pub payload: serde_json::Value,
}

impl StoredArtifact {
    pub fn new(run_id: &str, artifact_type: ArtifactType, payload: serde_json::Value) -> Self {
        Self {
            workflow_run_id: run_id.to_string(),
            artifact_type,
            created_at: chrono::Utc::now().to_rfc3339(),
            checksum: checksum(&payload),
            payload,
        }
    }

    /// Serialize a typed payload into an envelope.
    pub fn from_payload<A: ArtifactPayload>(run_id: &str, payload: &A) -> Result<Self, ArtifactError> {
        let value = serde_json::to_value(payload).map_err(|e| {
            ArtifactError::Storage(anyhow::Error::new(e).context("Failed to serialize artifact"))
        })?;
        Ok(Self::new(run_id, A::TYPE, value))
    }

    /// Check the stored checksum against the payload.
    pub fn verify(&self) -> Result<(), ArtifactError> {
        if checksum(&self.payload) == self.checksum {
            Ok(())
        } else {
            Err(self.corrupt("checksum mismatch"))
        }
    }

    /// Coerce the payload into `T`. A shape mismatch is corruption, never
    /// absence.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ArtifactError> {
        T::deserialize(&self.payload).map_err(|e| self.corrupt(&e.to_string()))
    }

    pub(crate) fn corrupt(&self, reason: &str) -> ArtifactError {
        ArtifactError::Corrupt {
            run_id: self.workflow_run_id.clone(),
            artifact_type: self.artifact_type,
            reason: reason.to_string(),
        }
    }
}

fn checksum(payload: &serde_json::Value) -> String {
    let digest = Sha256::digest(payload.to_string().as_bytes());
    format!("{:x}", digest)
}

pub(crate) fn check_run_id(run_id: &str) -> Result<(), ArtifactError> {
    if is_valid_run_id(run_id) {
        Ok(())
    } else {
        Err(ArtifactError::InvalidRunId(run_id.to_string()))
    }
}

/// Storage backend for artifacts.
///
/// `read` distinguishes absence (`NotFound`) from damage (`Corrupt`);
/// `write` must never leave a partially written artifact visible.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn write(&self, artifact: StoredArtifact) -> Result<(), ArtifactError>;

    async fn read(
        &self,
        run_id: &str,
        artifact_type: ArtifactType,
    ) -> Result<StoredArtifact, ArtifactError>;

    /// Artifact types present for `run_id`, sorted.
    async fn list(&self, run_id: &str) -> Result<Vec<ArtifactType>, ArtifactError>;

    async fn exists(&self, run_id: &str, artifact_type: ArtifactType) -> Result<bool, ArtifactError>;

    /// Remove an artifact. Returns whether anything was deleted.
    async fn delete(&self, run_id: &str, artifact_type: ArtifactType) -> Result<bool, ArtifactError>;

    /// Run ids that hold at least one artifact, sorted.
    async fn list_runs(&self) -> Result<Vec<String>, ArtifactError>;
}

impl dyn ArtifactStore {
    pub async fn write_artifact<A: ArtifactPayload>(
        &self,
        run_id: &str,
        payload: &A,
    ) -> Result<(), ArtifactError> {
        self.write(StoredArtifact::from_payload(run_id, payload)?).await
    }

    pub async fn read_artifact<A: ArtifactPayload>(&self, run_id: &str) -> Result<A, ArtifactError> {
        self.read(run_id, A::TYPE).await?.decode()
    }

    /// Untyped read for tooling: coerce whatever is stored under
    /// `artifact_type` into `T`.
    pub async fn read_artifact_as<T: DeserializeOwned>(
        &self,
        run_id: &str,
        artifact_type: ArtifactType,
    ) -> Result<T, ArtifactError> {
        self.read(run_id, artifact_type).await?.decode()
    }
}
