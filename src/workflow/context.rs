//! Per-run state shared by every step of one pipeline execution.
//!
//! Values flow between steps through an in-memory scratch map. Anything a
//! step persists as an artifact can be recovered into scratch on demand, so a
//! step neither knows nor cares whether its input was produced earlier in
//! this process or by a previous one.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use shipwright_common::{ArtifactPayload, IssueArtifact, Job};
use tracing::{debug, warn};

use crate::artifacts::ArtifactStore;
use crate::errors::ArtifactError;

/// Typed key into the scratch map.
pub struct ScratchKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ScratchKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ScratchKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ScratchKey<T> {}

impl<T> fmt::Debug for ScratchKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScratchKey({})", self.name)
    }
}

type Scratch = HashMap<String, Box<dyn Any + Send + Sync>>;

pub struct WorkflowContext {
    run_id: String,
    job_id: i64,
    parent_run_id: Option<String>,
    job: Option<Job>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    scratch: Scratch,
}

impl WorkflowContext {
    pub fn new(run_id: impl Into<String>, job_id: i64) -> Self {
        Self {
            run_id: run_id.into(),
            job_id,
            parent_run_id: None,
            job: None,
            artifacts: None,
            scratch: HashMap::new(),
        }
    }

    pub fn with_artifacts(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(store);
        self
    }

    pub fn with_parent_run(mut self, parent_run_id: Option<String>) -> Self {
        self.parent_run_id = parent_run_id;
        self
    }

    pub fn with_job(mut self, job: Job) -> Self {
        self.job = Some(job);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn job_id(&self) -> i64 {
        self.job_id
    }

    pub fn parent_run_id(&self) -> Option<&str> {
        self.parent_run_id.as_deref()
    }

    pub fn artifacts(&self) -> Option<&Arc<dyn ArtifactStore>> {
        self.artifacts.as_ref()
    }

    // ── Scratch ─────────────────────────────────────────────────────────

    pub fn get<T: Clone + 'static>(&self, key: ScratchKey<T>) -> Option<T> {
        self.get_raw(key.name)
    }

    pub fn insert<T: Send + Sync + 'static>(&mut self, key: ScratchKey<T>, value: T) {
        self.scratch.insert(key.name.to_string(), Box::new(value));
    }

    pub fn contains<T>(&self, key: ScratchKey<T>) -> bool {
        self.scratch.contains_key(key.name)
    }

    pub fn remove<T>(&mut self, key: ScratchKey<T>) {
        self.scratch.remove(key.name);
    }

    fn get_raw<T: Clone + 'static>(&self, name: &str) -> Option<T> {
        let value = self.scratch.get(name)?;
        match value.downcast_ref::<T>() {
            Some(v) => Some(v.clone()),
            None => {
                warn!(key = name, "Scratch entry holds a different type; ignoring");
                None
            }
        }
    }

    // ── Lazy artifact loading ───────────────────────────────────────────

    /// Return `key` from scratch, or recover it from this run's `A` artifact.
    ///
    /// `Ok(None)` means unavailable: no store attached or no such artifact.
    /// A corrupt artifact is an error.
    pub async fn get_or_load<A, T>(
        &mut self,
        key: ScratchKey<T>,
        extract: impl FnOnce(A) -> T,
    ) -> Result<Option<T>, ArtifactError>
    where
        A: ArtifactPayload,
        T: Clone + Send + Sync + 'static,
    {
        let run_id = self.run_id.clone();
        self.load_into(key.name, &run_id, extract).await
    }

    /// Shorthand for `get_or_load` with the artifact itself as the value,
    /// cached under the artifact type's name.
    pub async fn load_artifact<A>(&mut self) -> Result<Option<A>, ArtifactError>
    where
        A: ArtifactPayload + Clone,
    {
        let run_id = self.run_id.clone();
        self.load_into(A::TYPE.as_str(), &run_id, |a| a).await
    }

    /// Read `A` from the configured parent run. Unavailable when no parent
    /// run is set.
    pub async fn get_or_load_from_parent<A>(&mut self) -> Result<Option<A>, ArtifactError>
    where
        A: ArtifactPayload + Clone,
    {
        let Some(parent) = self.parent_run_id.clone() else {
            return Ok(None);
        };
        let key = format!("parent.{}", A::TYPE);
        self.load_into(&key, &parent, |a| a).await
    }

    async fn load_into<A, T>(
        &mut self,
        key: &str,
        run_id: &str,
        extract: impl FnOnce(A) -> T,
    ) -> Result<Option<T>, ArtifactError>
    where
        A: ArtifactPayload,
        T: Clone + Send + Sync + 'static,
    {
        if let Some(value) = self.get_raw::<T>(key) {
            return Ok(Some(value));
        }
        let Some(store) = self.artifacts.clone() else {
            return Ok(None);
        };
        let artifact = match store.read_artifact::<A>(run_id).await {
            Ok(a) => a,
            Err(ArtifactError::NotFound { .. }) => {
                debug!(run_id, artifact = %A::TYPE, "Artifact not available");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let value = extract(artifact);
        self.scratch.insert(key.to_string(), Box::new(value.clone()));
        Ok(Some(value))
    }

    /// Persist `payload` for this run (when a store is attached) and cache
    /// it in scratch under the artifact type's name.
    pub async fn save_artifact<A>(&mut self, payload: A) -> Result<(), ArtifactError>
    where
        A: ArtifactPayload + Clone,
    {
        if let Some(store) = &self.artifacts {
            store.write_artifact(&self.run_id, &payload).await?;
        }
        self.scratch
            .insert(A::TYPE.as_str().to_string(), Box::new(payload));
        Ok(())
    }

    // ── Job snapshot ────────────────────────────────────────────────────

    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    pub fn set_job(&mut self, job: Job) {
        self.job = Some(job);
    }

    /// The job this run works on, recovered from the `issue` artifact when
    /// the context was built without one.
    pub async fn load_job(&mut self) -> Result<Option<Job>, ArtifactError> {
        if let Some(job) = &self.job {
            return Ok(Some(job.clone()));
        }
        let issue = self.load_artifact::<IssueArtifact>().await?;
        if let Some(issue) = &issue {
            self.job = Some(issue.job.clone());
        }
        Ok(issue.map(|i| i.job))
    }
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("run_id", &self.run_id)
            .field("job_id", &self.job_id)
            .field("parent_run_id", &self.parent_run_id)
            .field("scratch_keys", &self.scratch.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{SqliteArtifactStore, StoredArtifact};
    use async_trait::async_trait;
    use shipwright_common::{ArtifactType, JobStatus, JobType, PlanArtifact};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps a store and counts reads.
    struct CountingStore {
        inner: SqliteArtifactStore,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl ArtifactStore for CountingStore {
        async fn write(&self, artifact: StoredArtifact) -> Result<(), ArtifactError> {
            self.inner.write(artifact).await
        }
        async fn read(
            &self,
            run_id: &str,
            artifact_type: ArtifactType,
        ) -> Result<StoredArtifact, ArtifactError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(run_id, artifact_type).await
        }
        async fn list(&self, run_id: &str) -> Result<Vec<ArtifactType>, ArtifactError> {
            self.inner.list(run_id).await
        }
        async fn exists(&self, run_id: &str, t: ArtifactType) -> Result<bool, ArtifactError> {
            self.inner.exists(run_id, t).await
        }
        async fn delete(&self, run_id: &str, t: ArtifactType) -> Result<bool, ArtifactError> {
            self.inner.delete(run_id, t).await
        }
        async fn list_runs(&self) -> Result<Vec<String>, ArtifactError> {
            self.inner.list_runs().await
        }
    }

    fn counting() -> Arc<CountingStore> {
        Arc::new(CountingStore {
            inner: SqliteArtifactStore::new_in_memory().unwrap(),
            reads: AtomicUsize::new(0),
        })
    }

    fn plan() -> PlanArtifact {
        PlanArtifact {
            summary: "Add caching".into(),
            steps: vec!["one".into(), "two".into()],
            raw: String::new(),
        }
    }

    const PLAN_STEPS: ScratchKey<Vec<String>> = ScratchKey::new("plan_steps");

    #[tokio::test]
    async fn test_get_or_load_reads_storage_once() {
        let store = counting();
        let dyn_store: Arc<dyn ArtifactStore> = store.clone();
        dyn_store.write_artifact("run1", &plan()).await.unwrap();

        let mut ctx = WorkflowContext::new("run1", 1).with_artifacts(dyn_store);
        let first = ctx
            .get_or_load::<PlanArtifact, _>(PLAN_STEPS, |p| p.steps)
            .await
            .unwrap();
        let second = ctx
            .get_or_load::<PlanArtifact, _>(PLAN_STEPS, |p| p.steps)
            .await
            .unwrap();

        assert_eq!(first, Some(vec!["one".to_string(), "two".to_string()]));
        assert_eq!(first, second);
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_artifact_is_unavailable() {
        let store: Arc<dyn ArtifactStore> = Arc::new(SqliteArtifactStore::new_in_memory().unwrap());
        let mut ctx = WorkflowContext::new("run1", 1).with_artifacts(store);
        assert!(ctx.load_artifact::<PlanArtifact>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_store_is_unavailable() {
        let mut ctx = WorkflowContext::new("run1", 1);
        assert!(ctx.load_artifact::<PlanArtifact>().await.unwrap().is_none());
        assert!(ctx.get_or_load_from_parent::<PlanArtifact>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_artifact_is_an_error() {
        let store: Arc<dyn ArtifactStore> = Arc::new(SqliteArtifactStore::new_in_memory().unwrap());
        store
            .write(StoredArtifact::new(
                "run1",
                ArtifactType::Plan,
                serde_json::json!({"nope": true}),
            ))
            .await
            .unwrap();
        let mut ctx = WorkflowContext::new("run1", 1).with_artifacts(store);
        let err = ctx.load_artifact::<PlanArtifact>().await.unwrap_err();
        assert!(matches!(err, ArtifactError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_save_writes_through_and_caches() {
        let store = counting();
        let dyn_store: Arc<dyn ArtifactStore> = store.clone();
        let mut ctx = WorkflowContext::new("run1", 1).with_artifacts(dyn_store.clone());

        ctx.save_artifact(plan()).await.unwrap();
        let loaded = ctx.load_artifact::<PlanArtifact>().await.unwrap();
        assert_eq!(loaded, Some(plan()));
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);

        let persisted: PlanArtifact = dyn_store.read_artifact("run1").await.unwrap();
        assert_eq!(persisted, plan());
    }

    #[tokio::test]
    async fn test_parent_run_reads_are_explicit() {
        let store: Arc<dyn ArtifactStore> = Arc::new(SqliteArtifactStore::new_in_memory().unwrap());
        store.write_artifact("parent", &plan()).await.unwrap();

        let mut ctx = WorkflowContext::new("child", 1)
            .with_artifacts(store.clone())
            .with_parent_run(Some("parent".into()));
        assert!(ctx.load_artifact::<PlanArtifact>().await.unwrap().is_none());
        assert_eq!(
            ctx.get_or_load_from_parent::<PlanArtifact>().await.unwrap(),
            Some(plan())
        );
    }

    #[tokio::test]
    async fn test_load_job_falls_back_to_issue_artifact() {
        let store: Arc<dyn ArtifactStore> = Arc::new(SqliteArtifactStore::new_in_memory().unwrap());
        let job = Job {
            id: 4,
            description: "Fix login".into(),
            status: JobStatus::Started,
            job_type: JobType::Main,
            assigned_to: None,
            run_id: Some("run1".into()),
            created_at: "2026-01-01 00:00:00.000".into(),
            updated_at: "2026-01-01 00:00:00.000".into(),
        };
        store
            .write_artifact("run1", &IssueArtifact { job: job.clone() })
            .await
            .unwrap();

        let mut ctx = WorkflowContext::new("run1", 4).with_artifacts(store);
        assert!(ctx.job().is_none());
        let loaded = ctx.load_job().await.unwrap().unwrap();
        assert_eq!(loaded.description, "Fix login");
        assert!(ctx.job().is_some());
    }

    #[test]
    fn test_scratch_type_mismatch_reads_as_absent() {
        const AS_NUMBER: ScratchKey<u32> = ScratchKey::new("shared");
        const AS_TEXT: ScratchKey<String> = ScratchKey::new("shared");
        let mut ctx = WorkflowContext::new("run1", 1);
        ctx.insert(AS_NUMBER, 3);
        assert_eq!(ctx.get(AS_NUMBER), Some(3));
        assert_eq!(ctx.get(AS_TEXT), None);
        assert!(ctx.contains(AS_TEXT));
    }
}
