use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use shipwright_common::ArtifactType;

use super::{ArtifactStore, StoredArtifact, check_run_id};
use crate::errors::ArtifactError;

/// Artifacts in an `artifacts` table, keyed by `(run_id, artifact_type)`.
///
/// Usually opened on the same file as the job database so one file holds
/// the whole state of a deployment.
#[derive(Clone)]
pub struct SqliteArtifactStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteArtifactStore {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open artifact database: {}", path.display()))?;
        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        Self::from_connection(conn)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory artifact database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS artifacts (
                run_id TEXT NOT NULL,
                artifact_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                checksum TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (run_id, artifact_type)
            );
            ",
        )
        .context("Failed to create artifacts table")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on a blocking thread.
    async fn call<F, R>(&self, f: F) -> Result<R, ArtifactError>
    where
        F: FnOnce(&Connection) -> Result<R, ArtifactError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|e| storage(anyhow::anyhow!("artifact DB lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .map_err(|e| storage(anyhow::anyhow!("artifact DB task panicked: {}", e)))?
    }
}

fn storage(err: anyhow::Error) -> ArtifactError {
    ArtifactError::Storage(err)
}

fn sql_err(what: &'static str) -> impl FnOnce(rusqlite::Error) -> ArtifactError {
    move |e| storage(anyhow::Error::new(e).context(what))
}

#[async_trait]
impl ArtifactStore for SqliteArtifactStore {
    async fn write(&self, artifact: StoredArtifact) -> Result<(), ArtifactError> {
        check_run_id(&artifact.workflow_run_id)?;
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO artifacts (run_id, artifact_type, payload, checksum, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(run_id, artifact_type) DO UPDATE SET
                     payload = excluded.payload,
                     checksum = excluded.checksum,
                     created_at = excluded.created_at",
                params![
                    artifact.workflow_run_id,
                    artifact.artifact_type.as_str(),
                    artifact.payload.to_string(),
                    artifact.checksum,
                    artifact.created_at
                ],
            )
            .map_err(sql_err("Failed to write artifact"))?;
            Ok(())
        })
        .await
    }

    async fn read(
        &self,
        run_id: &str,
        artifact_type: ArtifactType,
    ) -> Result<StoredArtifact, ArtifactError> {
        check_run_id(run_id)?;
        let run_id = run_id.to_string();
        self.call(move |conn| {
            let row: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT payload, checksum, created_at FROM artifacts
                     WHERE run_id = ?1 AND artifact_type = ?2",
                    params![run_id, artifact_type.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()
                .map_err(sql_err("Failed to read artifact"))?;
            let Some((payload, checksum, created_at)) = row else {
                return Err(ArtifactError::NotFound {
                    run_id,
                    artifact_type,
                });
            };
            let payload =
                serde_json::from_str::<serde_json::Value>(&payload).map_err(|e| ArtifactError::Corrupt {
                    run_id: run_id.clone(),
                    artifact_type,
                    reason: e.to_string(),
                })?;
            let artifact = StoredArtifact {
                workflow_run_id: run_id,
                artifact_type,
                created_at,
                checksum,
                payload,
            };
            artifact.verify()?;
            Ok(artifact)
        })
        .await
    }

    async fn list(&self, run_id: &str) -> Result<Vec<ArtifactType>, ArtifactError> {
        check_run_id(run_id)?;
        let run_id = run_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn
                .prepare("SELECT artifact_type FROM artifacts WHERE run_id = ?1")
                .map_err(sql_err("Failed to prepare artifact listing"))?;
            let rows = stmt
                .query_map(params![run_id], |row| row.get::<_, String>(0))
                .map_err(sql_err("Failed to list artifacts"))?;
            let mut types = Vec::new();
            for row in rows {
                let name = row.map_err(sql_err("Failed to read artifact row"))?;
                // Unknown tags come from newer writers; skip rather than fail.
                if let Ok(t) = ArtifactType::from_str(&name) {
                    types.push(t);
                }
            }
            types.sort();
            Ok(types)
        })
        .await
    }

    async fn exists(&self, run_id: &str, artifact_type: ArtifactType) -> Result<bool, ArtifactError> {
        check_run_id(run_id)?;
        let run_id = run_id.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) > 0 FROM artifacts WHERE run_id = ?1 AND artifact_type = ?2",
                params![run_id, artifact_type.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .map_err(sql_err("Failed to check artifact"))
        })
        .await
    }

    async fn delete(&self, run_id: &str, artifact_type: ArtifactType) -> Result<bool, ArtifactError> {
        check_run_id(run_id)?;
        let run_id = run_id.to_string();
        self.call(move |conn| {
            let count = conn
                .execute(
                    "DELETE FROM artifacts WHERE run_id = ?1 AND artifact_type = ?2",
                    params![run_id, artifact_type.as_str()],
                )
                .map_err(sql_err("Failed to delete artifact"))?;
            Ok(count > 0)
        })
        .await
    }

    async fn list_runs(&self) -> Result<Vec<String>, ArtifactError> {
        self.call(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT run_id FROM artifacts ORDER BY run_id")
                .map_err(sql_err("Failed to prepare run listing"))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(sql_err("Failed to list runs"))?;
            let mut runs = Vec::new();
            for row in rows {
                runs.push(row.map_err(sql_err("Failed to read run row"))?);
            }
            Ok(runs)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_common::{ClassificationArtifact, PlanArtifact, ReviewArtifact, ReviewFinding};
    use tempfile::TempDir;

    fn store() -> Arc<dyn ArtifactStore> {
        Arc::new(SqliteArtifactStore::new_in_memory().unwrap())
    }

    fn plan() -> PlanArtifact {
        PlanArtifact {
            summary: "Add retry".into(),
            steps: vec!["wrap upload".into(), "add test".into()],
            raw: String::new(),
        }
    }

    #[tokio::test]
    async fn test_write_then_read_returns_equal_payload() {
        let store = store();
        store.write_artifact("run1", &plan()).await.unwrap();
        let back: PlanArtifact = store.read_artifact("run1").await.unwrap();
        assert_eq!(back, plan());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_found() {
        let store = store();
        let err = store.read_artifact::<PlanArtifact>("run1").await.unwrap_err();
        assert!(matches!(
            err,
            ArtifactError::NotFound {
                artifact_type: ArtifactType::Plan,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_overwrite_replaces_previous_value() {
        let store = store();
        store.write_artifact("run1", &plan()).await.unwrap();
        let mut second = plan();
        second.summary = "Second attempt".into();
        store.write_artifact("run1", &second).await.unwrap();

        let back: PlanArtifact = store.read_artifact("run1").await.unwrap();
        assert_eq!(back.summary, "Second attempt");
        assert_eq!(store.list("run1").await.unwrap(), vec![ArtifactType::Plan]);
    }

    #[tokio::test]
    async fn test_runs_are_isolated() {
        let store = store();
        store.write_artifact("run1", &plan()).await.unwrap();
        assert!(!store.exists("run2", ArtifactType::Plan).await.unwrap());
        assert!(store.exists("run1", ArtifactType::Plan).await.unwrap());
        assert_eq!(store.list_runs().await.unwrap(), vec!["run1".to_string()]);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = store();
        store.write_artifact("run1", &plan()).await.unwrap();
        store
            .write_artifact(
                "run1",
                &ReviewArtifact {
                    summary: "two nits".into(),
                    findings: vec![ReviewFinding {
                        severity: "minor".into(),
                        file: Some("src/lib.rs".into()),
                        description: "rename".into(),
                    }],
                },
            )
            .await
            .unwrap();
        assert_eq!(
            store.list("run1").await.unwrap(),
            vec![ArtifactType::Plan, ArtifactType::Review]
        );

        assert!(store.delete("run1", ArtifactType::Plan).await.unwrap());
        assert!(!store.delete("run1", ArtifactType::Plan).await.unwrap());
        assert_eq!(store.list("run1").await.unwrap(), vec![ArtifactType::Review]);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_a_hard_error() {
        let sqlite = SqliteArtifactStore::new_in_memory().unwrap();
        sqlite
            .conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO artifacts (run_id, artifact_type, payload, checksum, created_at)
                 VALUES ('run1', 'plan', '{not json', 'x', 'now')",
                [],
            )
            .unwrap();
        let store: Arc<dyn ArtifactStore> = Arc::new(sqlite);
        let err = store.read_artifact::<PlanArtifact>("run1").await.unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_wrong_shape_is_corrupt_not_missing() {
        let store = store();
        store.write_artifact("run1", &plan()).await.unwrap();
        // A plan has no `kind`, so it cannot decode as a classification.
        let err = store
            .read_artifact_as::<ClassificationArtifact>("run1", ArtifactType::Plan)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_shares_file_with_job_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shipwright.db");
        let _jobs = crate::jobs::JobDb::new(&path).unwrap();
        let store: Arc<dyn ArtifactStore> =
            Arc::new(SqliteArtifactStore::open(&path, Duration::from_secs(5)).unwrap());
        store.write_artifact("abc", &plan()).await.unwrap();

        let reopened: Arc<dyn ArtifactStore> =
            Arc::new(SqliteArtifactStore::open(&path, Duration::from_secs(5)).unwrap());
        let back: PlanArtifact = reopened.read_artifact("abc").await.unwrap();
        assert_eq!(back, plan());
    }
}
