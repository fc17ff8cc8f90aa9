use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use shipwright_common::ArtifactType;

use super::{ArtifactStore, StoredArtifact, check_run_id};
use crate::errors::ArtifactError;

/// Artifacts as `<root>/<run_id>/<artifact_type>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader sees either the old file or the new one.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf, ArtifactError> {
        check_run_id(run_id)?;
        Ok(self.root.join(run_id))
    }

    fn artifact_path(&self, run_id: &str, artifact_type: ArtifactType) -> Result<PathBuf, ArtifactError> {
        Ok(self
            .run_dir(run_id)?
            .join(format!("{}.json", artifact_type.as_str())))
    }
}

fn io_err(err: std::io::Error, what: String) -> ArtifactError {
    ArtifactError::Storage(anyhow::Error::new(err).context(what))
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn write(&self, artifact: StoredArtifact) -> Result<(), ArtifactError> {
        let dir = self.run_dir(&artifact.workflow_run_id)?;
        let path = self.artifact_path(&artifact.workflow_run_id, artifact.artifact_type)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err(e, format!("Failed to create {}", dir.display())))?;

        let body = serde_json::to_vec_pretty(&artifact)
            .context("Failed to serialize artifact")
            .map_err(ArtifactError::Storage)?;
        let tmp = dir.join(format!(
            ".{}.{}.tmp",
            artifact.artifact_type.as_str(),
            uuid::Uuid::new_v4().simple()
        ));
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| io_err(e, format!("Failed to write {}", tmp.display())))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(e, format!("Failed to move artifact into {}", path.display())));
        }
        Ok(())
    }

    async fn read(
        &self,
        run_id: &str,
        artifact_type: ArtifactType,
    ) -> Result<StoredArtifact, ArtifactError> {
        let path = self.artifact_path(run_id, artifact_type)?;
        let body = match tokio::fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ArtifactError::NotFound {
                    run_id: run_id.to_string(),
                    artifact_type,
                });
            }
            Err(e) => return Err(io_err(e, format!("Failed to read {}", path.display()))),
        };
        let artifact: StoredArtifact =
            serde_json::from_slice(&body).map_err(|e| ArtifactError::Corrupt {
                run_id: run_id.to_string(),
                artifact_type,
                reason: e.to_string(),
            })?;
        if artifact.artifact_type != artifact_type || artifact.workflow_run_id != run_id {
            return Err(artifact.corrupt("envelope does not match its location"));
        }
        artifact.verify()?;
        Ok(artifact)
    }

    async fn list(&self, run_id: &str) -> Result<Vec<ArtifactType>, ArtifactError> {
        let dir = self.run_dir(run_id)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e, format!("Failed to list {}", dir.display()))),
        };
        let mut types = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err(e, format!("Failed to list {}", dir.display())))?
        {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Ok(t) = ArtifactType::from_str(stem) {
                types.push(t);
            }
        }
        types.sort();
        Ok(types)
    }

    async fn exists(&self, run_id: &str, artifact_type: ArtifactType) -> Result<bool, ArtifactError> {
        let path = self.artifact_path(run_id, artifact_type)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_err(e, format!("Failed to stat {}", path.display())))
    }

    async fn delete(&self, run_id: &str, artifact_type: ArtifactType) -> Result<bool, ArtifactError> {
        let path = self.artifact_path(run_id, artifact_type)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(e, format!("Failed to delete {}", path.display()))),
        }
    }

    async fn list_runs(&self) -> Result<Vec<String>, ArtifactError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e, format!("Failed to list {}", self.root.display()))),
        };
        let mut runs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err(e, format!("Failed to list {}", self.root.display())))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if let Some(name) = entry.file_name().to_str()
                && is_dir
                && crate::util::is_valid_run_id(name)
            {
                runs.push(name.to_string());
            }
        }
        runs.sort();
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_common::{AcceptanceArtifact, PlanArtifact};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<dyn ArtifactStore>) {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ArtifactStore> = Arc::new(FileArtifactStore::new(dir.path()));
        (dir, store)
    }

    #[tokio::test]
    async fn test_layout_is_run_dir_then_type_file() {
        let (dir, store) = setup();
        store
            .write_artifact(
                "run1",
                &AcceptanceArtifact {
                    accepted: true,
                    notes: "all criteria met".into(),
                },
            )
            .await
            .unwrap();
        assert!(dir.path().join("run1").join("acceptance.json").is_file());

        let back: AcceptanceArtifact = store.read_artifact("run1").await.unwrap();
        assert!(back.accepted);
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let (dir, store) = setup();
        for i in 0..3 {
            let plan = PlanArtifact {
                summary: format!("v{}", i),
                steps: vec![],
                raw: String::new(),
            };
            store.write_artifact("run1", &plan).await.unwrap();
        }
        let names: Vec<_> = std::fs::read_dir(dir.path().join("run1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["plan.json".to_string()]);
        let back: PlanArtifact = store.read_artifact("run1").await.unwrap();
        assert_eq!(back.summary, "v2");
    }

    #[tokio::test]
    async fn test_missing_run_and_missing_type() {
        let (_dir, store) = setup();
        assert!(store.list("nope").await.unwrap().is_empty());
        assert!(store.list_runs().await.unwrap().is_empty());
        assert!(matches!(
            store.read_artifact::<PlanArtifact>("nope").await,
            Err(ArtifactError::NotFound { .. })
        ));
        assert!(!store.delete("nope", ArtifactType::Plan).await.unwrap());
    }

    #[tokio::test]
    async fn test_truncated_file_is_corrupt() {
        let (dir, store) = setup();
        std::fs::create_dir_all(dir.path().join("run1")).unwrap();
        std::fs::write(dir.path().join("run1").join("plan.json"), b"{\"workflow_run_id\":").unwrap();
        assert!(matches!(
            store.read_artifact::<PlanArtifact>("run1").await,
            Err(ArtifactError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_misplaced_envelope_is_corrupt() {
        let (dir, store) = setup();
        let plan = PlanArtifact {
            summary: "x".into(),
            steps: vec![],
            raw: String::new(),
        };
        store.write_artifact("run1", &plan).await.unwrap();
        std::fs::copy(
            dir.path().join("run1").join("plan.json"),
            dir.path().join("run1").join("review.json"),
        )
        .unwrap();
        assert!(matches!(
            store.read("run1", ArtifactType::Review).await,
            Err(ArtifactError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_path_escaping_run_ids_are_rejected() {
        let (_dir, store) = setup();
        let plan = PlanArtifact {
            summary: "x".into(),
            steps: vec![],
            raw: String::new(),
        };
        assert!(matches!(
            store.write_artifact("../outside", &plan).await,
            Err(ArtifactError::InvalidRunId(_))
        ));
        assert!(matches!(
            store.list("a/b").await,
            Err(ArtifactError::InvalidRunId(_))
        ));
    }

    #[tokio::test]
    async fn test_list_runs_and_types() {
        let (_dir, store) = setup();
        let plan = PlanArtifact {
            summary: "x".into(),
            steps: vec![],
            raw: String::new(),
        };
        store.write_artifact("bbb", &plan).await.unwrap();
        store.write_artifact("aaa", &plan).await.unwrap();
        store
            .write_artifact(
                "aaa",
                &AcceptanceArtifact {
                    accepted: false,
                    notes: String::new(),
                },
            )
            .await
            .unwrap();
        assert_eq!(store.list_runs().await.unwrap(), vec!["aaa", "bbb"]);
        assert_eq!(
            store.list("aaa").await.unwrap(),
            vec![ArtifactType::Plan, ArtifactType::Acceptance]
        );
    }
}
