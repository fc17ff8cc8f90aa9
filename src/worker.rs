//! The worker daemon: claim a job, run its workflow, record the outcome.
//!
//! Between jobs the loop reclaims stale rows (when configured), claims with
//! exponential backoff while the job store is unavailable, and otherwise
//! sleeps for the poll interval. Shutdown is checked only between jobs; a
//! running workflow is never interrupted mid-step.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use shipwright_common::{Job, JobType};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::artifacts::{ArtifactStore, FileArtifactStore, SqliteArtifactStore};
use crate::config::{ArtifactBackend, ShipwrightConfig};
use crate::errors::{JobStoreError, PipelineError};
use crate::jobs::{DbHandle, JobDb};
use crate::util::new_run_id;
use crate::workflow::{PipelineRunner, RunSummary, StepLedger, WorkflowContext, WorkflowRegistry};

// ── Store wiring ──────────────────────────────────────────────────────

/// Open the job database named by the config, creating parent directories.
pub fn open_job_db(config: &ShipwrightConfig) -> Result<DbHandle> {
    let path = config.db_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = JobDb::open(&path, config.busy_timeout())?;
    Ok(DbHandle::new(db))
}

/// Open the configured artifact backend.
pub fn open_artifact_store(config: &ShipwrightConfig) -> Result<Arc<dyn ArtifactStore>> {
    match config.toml.artifacts.backend {
        ArtifactBackend::Sqlite => {
            let store = SqliteArtifactStore::open(&config.db_path(), config.busy_timeout())?;
            Ok(Arc::new(store))
        }
        ArtifactBackend::Files => Ok(Arc::new(FileArtifactStore::new(config.artifacts_dir()))),
    }
}

// ── Shutdown ──────────────────────────────────────────────────────────

/// Shutdown channel flipped to `true` on Ctrl-C (or SIGTERM on Unix).
pub fn shutdown_on_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown requested; finishing the current job first");
        let _ = tx.send(true);
    });
    rx
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

// ── Worker ────────────────────────────────────────────────────────────

/// What happened to one processed job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: i64,
    pub run_id: String,
    pub success: bool,
    pub error: Option<String>,
}

pub struct Worker {
    worker_id: String,
    jobs: DbHandle,
    artifacts: Arc<dyn ArtifactStore>,
    registry: Arc<WorkflowRegistry>,
    config: Arc<ShipwrightConfig>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        worker_id: impl Into<String>,
        jobs: DbHandle,
        artifacts: Arc<dyn ArtifactStore>,
        registry: Arc<WorkflowRegistry>,
        config: Arc<ShipwrightConfig>,
    ) -> Self {
        let poll_interval = Duration::from_secs(config.toml.worker.poll_interval_secs);
        Self {
            worker_id: worker_id.into(),
            jobs,
            artifacts,
            registry,
            config,
            poll_interval,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Poll until shutdown. With `once`, return after the first job (or the
    /// first empty poll). Returns the number of jobs processed.
    pub async fn run(&self, once: bool, mut shutdown: watch::Receiver<bool>) -> Result<usize> {
        info!(
            worker_id = %self.worker_id,
            poll_secs = self.poll_interval.as_secs(),
            "Worker started"
        );
        let mut processed = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.reclaim_stale().await;

            let Some(job) = self.claim_with_backoff().await? else {
                if once {
                    info!("No claimable jobs");
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            };

            if *shutdown.borrow() {
                let id = job.id;
                self.jobs.call(move |db| db.release_job(id)).await?;
                info!(job_id = id, "Released claimed job on shutdown");
                break;
            }

            let outcome = self.process_job(job).await;
            processed += 1;
            if outcome.success {
                info!(job_id = outcome.job_id, run_id = %outcome.run_id, "Job completed");
            } else {
                warn!(
                    job_id = outcome.job_id,
                    run_id = %outcome.run_id,
                    error = outcome.error.as_deref().unwrap_or_default(),
                    "Job failed"
                );
            }
            if once {
                break;
            }
        }

        info!(worker_id = %self.worker_id, processed, "Worker stopped");
        Ok(processed)
    }

    async fn reclaim_stale(&self) {
        let Some(secs) = self.config.toml.worker.reclaim_after_secs else {
            return;
        };
        match self
            .jobs
            .call(move |db| db.reclaim_stale_jobs(Duration::from_secs(secs)))
            .await
        {
            Ok(jobs) => {
                for job in jobs {
                    warn!(job_id = job.id, status = %job.status, "Reclaimed stale job");
                }
            }
            Err(e) => warn!("Stale job reclaim failed: {:#}", e),
        }
    }

    /// Claim one job, retrying transient store outages with exponential
    /// backoff. Other errors and an exhausted retry budget are returned.
    async fn claim_with_backoff(&self) -> Result<Option<Job>> {
        let settings = &self.config.toml.worker;
        let max_delay = Duration::from_millis(settings.claim_retry_max_ms);
        let mut delay = Duration::from_millis(settings.claim_retry_base_ms);
        let mut attempt = 0;

        loop {
            match self.jobs.claim_next_job(Some(self.worker_id.clone())).await {
                Ok(job) => return Ok(job),
                Err(JobStoreError::Unavailable(e)) if attempt < settings.claim_retry_attempts => {
                    attempt += 1;
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Job store unavailable, retrying claim: {:#}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_delay);
                }
                Err(e) => return Err(e).context("Failed to claim a job"),
            }
        }
    }

    /// Run the workflow for a claimed job and record the outcome on both the
    /// job and its run record. Bookkeeping failures are logged and reported
    /// in the outcome; they never stop the worker.
    pub async fn process_job(&self, job: Job) -> JobOutcome {
        let run_id = new_run_id();
        let job_id = job.id;
        let workflow_type = job.job_type.workflow_type();
        let parent_run_id = match job.job_type {
            JobType::Patch => job.run_id.clone(),
            JobType::Main => None,
        };
        info!(job_id, run_id = %run_id, workflow_type, "Processing job");

        let (run, parent) = (run_id.clone(), parent_run_id.clone());
        let started = self
            .jobs
            .call(move |db| {
                db.create_run(&run, job_id, workflow_type, parent.as_deref())?;
                db.set_job_run(job_id, &run)
            })
            .await;
        if let Err(e) = started {
            let error = format!("Failed to record run: {:#}", e);
            error!(job_id, run_id = %run_id, "{}", error);
            let (run, err) = (run_id.clone(), error.clone());
            if let Err(e) = self
                .jobs
                .call(move |db| db.finish_run(&run, false, Some(&err)))
                .await
            {
                debug!(job_id, "No run record to close: {:#}", e);
            }
            if let Err(e) = self.jobs.call(move |db| db.release_job(job_id)).await {
                warn!(job_id, "Failed to release job: {:#}", e);
            }
            return JobOutcome {
                job_id,
                run_id,
                success: false,
                error: Some(error),
            };
        }

        let heartbeat = self.spawn_heartbeat(job_id);
        let result = self
            .execute(job, workflow_type, &run_id, parent_run_id)
            .await;
        heartbeat.abort();

        let error = match &result {
            Ok(summary) => {
                for failure in &summary.best_effort_failures {
                    debug!(step = %failure.step, "Best-effort step failed: {}", failure.error);
                }
                None
            }
            Err(e) => Some(e.to_string()),
        };
        let success = error.is_none();

        self.record_outcome(job_id, &run_id, success, error.as_deref())
            .await;

        JobOutcome {
            job_id,
            run_id,
            success,
            error,
        }
    }

    /// Close the run record, then move the job to its final status. Each
    /// write is attempted on its own; the job may have been released or
    /// reclaimed while the workflow ran.
    async fn record_outcome(&self, job_id: i64, run_id: &str, success: bool, error: Option<&str>) {
        let (run, err) = (run_id.to_string(), error.map(str::to_string));
        if let Err(e) = self
            .jobs
            .call(move |db| db.finish_run(&run, success, err.as_deref()))
            .await
        {
            warn!(job_id, run_id, "Failed to record run outcome: {:#}", e);
        }
        if let Err(e) = self.jobs.call(move |db| db.finish_job(job_id, success)).await {
            warn!(job_id, run_id, "Failed to finish job: {:#}", e);
        }
    }

    /// Resolve and run a workflow for `job` under the workflow timeout.
    /// Leaves the job row untouched; callers record the outcome.
    pub async fn execute(
        &self,
        job: Job,
        workflow_type: &str,
        run_id: &str,
        parent_run_id: Option<String>,
    ) -> Result<RunSummary, RunError> {
        let pipeline = self.registry.resolve(workflow_type)?;
        let mut ctx = WorkflowContext::new(run_id, job.id)
            .with_artifacts(self.artifacts.clone())
            .with_parent_run(parent_run_id)
            .with_job(job);
        let runner = PipelineRunner::new(self.config.toml.pipeline.max_reruns)
            .with_observer(Arc::new(StepLedger::new(self.jobs.clone())));

        let secs = self.config.toml.worker.workflow_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(secs), runner.run(&pipeline, &mut ctx)).await
        {
            Ok(result) => Ok(result?),
            Err(_) => {
                error!(run_id, timeout_secs = secs, "Workflow timed out");
                Err(PipelineError::Timeout { secs }.into())
            }
        }
    }

    fn spawn_heartbeat(&self, job_id: i64) -> JoinHandle<()> {
        let jobs = self.jobs.clone();
        let worker_id = self.worker_id.clone();
        let every = Duration::from_secs(self.config.toml.worker.heartbeat_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let id = worker_id.clone();
                match jobs.call(move |db| db.heartbeat(job_id, Some(&id))).await {
                    Ok(true) => debug!(job_id, "Heartbeat"),
                    Ok(false) => {
                        warn!(job_id, "Job no longer owned by this worker; stopping heartbeat");
                        break;
                    }
                    Err(e) => warn!(job_id, "Heartbeat failed: {:#}", e),
                }
            }
        })
    }
}

/// Why a workflow did not complete.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Registry(#[from] crate::errors::RegistryError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
