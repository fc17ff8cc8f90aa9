use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params,
};
use shipwright_common::{Job, JobStatus, JobType, normalize_description};

use super::models::*;
use crate::errors::JobStoreError;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const JOB_COLUMNS: &str =
    "id, description, status, job_type, assigned_to, run_id, created_at, updated_at";

const RUN_COLUMNS: &str =
    "run_id, job_id, workflow_type, parent_run_id, status, error, started_at, completed_at";

/// Async-safe handle to the job database.
///
/// Wraps `JobDb` behind `Arc<Mutex>` and runs all access on tokio's blocking
/// thread pool via `spawn_blocking`, keeping synchronous SQLite I/O off the
/// async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<JobDb>>,
}

impl DbHandle {
    pub fn new(db: JobDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&JobDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| JobStoreError::Unavailable(anyhow::anyhow!("DB lock poisoned: {}", e)))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Claim with the typed error preserved, so callers can tell a transient
    /// outage from everything else.
    pub async fn claim_next_job(
        &self,
        worker_id: Option<String>,
    ) -> Result<Option<Job>, JobStoreError> {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| JobStoreError::Unavailable(anyhow::anyhow!("DB lock poisoned: {}", e)))?;
            guard.claim_next_job(worker_id.as_deref())
        })
        .await
        .map_err(|e| JobStoreError::Unavailable(anyhow::anyhow!("DB task panicked: {}", e)))?
    }

    /// Acquire the database mutex synchronously. For startup and tests only;
    /// never call this from an async hot path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, JobDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// Map rusqlite failures onto the transient job-store error.
trait OrUnavailable<T> {
    fn unavailable(self, what: &'static str) -> Result<T, JobStoreError>;
}

impl<T> OrUnavailable<T> for rusqlite::Result<T> {
    fn unavailable(self, what: &'static str) -> Result<T, JobStoreError> {
        self.map_err(|e| JobStoreError::Unavailable(anyhow::Error::new(e).context(what)))
    }
}

struct JobRow {
    id: i64,
    description: String,
    status: String,
    job_type: String,
    assigned_to: Option<String>,
    run_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            description: row.get(1)?,
            status: row.get(2)?,
            job_type: row.get(3)?,
            assigned_to: row.get(4)?,
            run_id: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_job(self) -> Result<Job, JobStoreError> {
        let status = JobStatus::from_str(&self.status)
            .map_err(|e| JobStoreError::CorruptRow(format!("job {}: {}", self.id, e)))?;
        let job_type = JobType::from_str(&self.job_type)
            .map_err(|e| JobStoreError::CorruptRow(format!("job {}: {}", self.id, e)))?;
        Ok(Job {
            id: self.id,
            description: self.description,
            status,
            job_type,
            assigned_to: self.assigned_to,
            run_id: self.run_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct RunRow {
    run_id: String,
    job_id: i64,
    workflow_type: String,
    parent_run_id: Option<String>,
    status: String,
    error: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            job_id: row.get(1)?,
            workflow_type: row.get(2)?,
            parent_run_id: row.get(3)?,
            status: row.get(4)?,
            error: row.get(5)?,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
        })
    }

    fn into_run(self) -> Result<WorkflowRun> {
        let status = RunStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Invalid run status in database")?;
        Ok(WorkflowRun {
            run_id: self.run_id,
            job_id: self.job_id,
            workflow_type: self.workflow_type,
            parent_run_id: self.parent_run_id,
            status,
            error: self.error,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

pub struct JobDb {
    conn: Connection,
}

impl JobDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        Self::open(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open with an explicit busy timeout. Concurrent claimers wait up to
    /// this long for the writer lock instead of failing.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .unavailable("Failed to open SQLite database")
            .with_context(|| format!("Database path: {}", path.display()))?;
        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .context("Failed to enable WAL journal")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS jobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    description TEXT NOT NULL CHECK (length(trim(description)) > 0),
                    status TEXT NOT NULL DEFAULT 'pending'
                        CHECK (status IN ('pending', 'started', 'completed', 'patch_pending', 'patched', 'failed')),
                    job_type TEXT NOT NULL DEFAULT 'main'
                        CHECK (job_type IN ('main', 'patch')),
                    assigned_to TEXT,
                    run_id TEXT,
                    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
                );

                CREATE TABLE IF NOT EXISTS workflow_runs (
                    run_id TEXT PRIMARY KEY,
                    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                    workflow_type TEXT NOT NULL,
                    parent_run_id TEXT,
                    status TEXT NOT NULL DEFAULT 'running'
                        CHECK (status IN ('running', 'succeeded', 'failed')),
                    error TEXT,
                    started_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS run_steps (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL REFERENCES workflow_runs(run_id) ON DELETE CASCADE,
                    step_name TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'running',
                    attempts INTEGER NOT NULL DEFAULT 0,
                    error TEXT,
                    started_at TEXT,
                    completed_at TEXT,
                    UNIQUE(run_id, step_name)
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_status_type ON jobs(status, job_type);
                CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at, id);
                CREATE INDEX IF NOT EXISTS idx_workflow_runs_job ON workflow_runs(job_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction. The writer lock is
    /// taken up front, so a concurrent writer waits on the busy timeout
    /// instead of failing on a stale WAL snapshot.
    fn immediate<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .unavailable("Failed to begin write transaction")?;
        let value = f(&tx)?;
        tx.commit().unavailable("Failed to commit write transaction")?;
        Ok(value)
    }

    // ── Job CRUD ──────────────────────────────────────────────────────

    pub fn create_job(
        &self,
        description: &str,
        job_type: JobType,
        assigned_to: Option<&str>,
    ) -> Result<Job> {
        let description = normalize_description(description)
            .ok_or_else(|| JobStoreError::InvalidJob("description must not be empty".into()))?;
        let assigned_to = assigned_to.map(str::trim).filter(|w| !w.is_empty());
        self.conn
            .execute(
                "INSERT INTO jobs (description, status, job_type, assigned_to) VALUES (?1, ?2, ?3, ?4)",
                params![
                    description,
                    job_type.queued_status().as_str(),
                    job_type.as_str(),
                    assigned_to
                ],
            )
            .unavailable("Failed to insert job")?;
        let id = self.conn.last_insert_rowid();
        self.require_job(id)
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![id], JobRow::from_row)
            .optional()
            .unavailable("Failed to query job")?;
        match row {
            Some(r) => Ok(Some(r.into_job()?)),
            None => Ok(None),
        }
    }

    /// Like `get_job`, but absence is a `JobNotFound` error.
    pub fn require_job(&self, id: i64) -> Result<Job> {
        self.get_job(id)?
            .ok_or_else(|| JobStoreError::JobNotFound { id }.into())
    }

    pub fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at, id",
            JOB_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .unavailable("Failed to prepare list_jobs")?;
        let rows = stmt
            .query_map(params![status.map(|s| s.as_str())], JobRow::from_row)
            .unavailable("Failed to query jobs")?;
        let mut jobs = Vec::new();
        for row in rows {
            let r = row.unavailable("Failed to read job row")?;
            jobs.push(r.into_job()?);
        }
        Ok(jobs)
    }

    // ── Claim ─────────────────────────────────────────────────────────

    /// Atomically take the oldest claimable job.
    ///
    /// Eligible rows are `pending` or `patch_pending`. With a worker id, rows
    /// reserved for that worker or for nobody qualify and the worker is
    /// stamped on the claimed row; without one, only unreserved rows qualify.
    /// Ordering is `created_at`, then `id`.
    ///
    /// SQLite locks the whole database rather than rows, so there is nothing
    /// to skip: `BEGIN IMMEDIATE` serializes claimers, and each one selects
    /// against the state the previous claimer committed. Every claimer either
    /// gets a distinct row or `None`.
    pub fn claim_next_job(&self, worker_id: Option<&str>) -> Result<Option<Job>, JobStoreError> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .unavailable("Failed to begin claim transaction")?;
        let sql = format!(
            "UPDATE jobs
             SET status = 'started', assigned_to = ?1,
                 updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE status IN ('pending', 'patch_pending')
                   AND (assigned_to IS NULL OR assigned_to = ?1)
                 ORDER BY created_at, id
                 LIMIT 1
             )
             RETURNING {}",
            JOB_COLUMNS
        );
        let row = tx
            .query_row(&sql, params![worker_id], JobRow::from_row)
            .optional()
            .unavailable("Failed to claim job")?;
        tx.commit().unavailable("Failed to commit claim")?;
        row.map(JobRow::into_job).transpose()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Move `id` from its current status to `to`, clearing the assignment.
    /// `job_type` and `description` are replaced when given. Fails if the
    /// edge is not allowed or the row changed underneath us.
    fn transition(
        &self,
        id: i64,
        to: JobStatus,
        job_type: Option<JobType>,
        description: Option<&str>,
    ) -> Result<Job> {
        self.immediate(|conn| {
            let job = self.require_job(id)?;
            let invalid = || JobStoreError::InvalidTransition {
                id,
                from: job.status,
                to,
            };
            if !job.status.can_transition_to(to) {
                return Err(invalid().into());
            }
            let changed = conn
                .execute(
                    "UPDATE jobs
                     SET status = ?1,
                         assigned_to = NULL,
                         job_type = COALESCE(?4, job_type),
                         description = COALESCE(?5, description),
                         updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                     WHERE id = ?2 AND status = ?3",
                    params![
                        to.as_str(),
                        id,
                        job.status.as_str(),
                        job_type.map(|t| t.as_str()),
                        description
                    ],
                )
                .unavailable("Failed to update job status")?;
            if changed != 1 {
                return Err(invalid().into());
            }
            Ok(())
        })?;
        self.require_job(id)
    }

    /// End a run: `completed` (or `patched` for patch jobs) on success,
    /// `failed` otherwise.
    pub fn finish_job(&self, id: i64, success: bool) -> Result<Job> {
        let job = self.require_job(id)?;
        let to = if success {
            job.job_type.success_status()
        } else {
            JobStatus::Failed
        };
        self.transition(id, to, None, None)
    }

    /// Hand a started job back to its queue without running it.
    pub fn release_job(&self, id: i64) -> Result<Job> {
        let job = self.require_job(id)?;
        self.transition(id, job.job_type.queued_status(), None, None)
    }

    /// Re-queue a finished job as a patch. The previous `run_id` is kept so
    /// the patch run can read the original run's artifacts.
    pub fn requeue_as_patch(&self, id: i64, description: Option<&str>) -> Result<Job> {
        let description = match description {
            Some(d) => Some(normalize_description(d).ok_or_else(|| {
                JobStoreError::InvalidJob("description must not be empty".into())
            })?),
            None => None,
        };
        self.transition(
            id,
            JobStatus::PatchPending,
            Some(JobType::Patch),
            description.as_deref(),
        )
    }

    /// Put a failed job back in its queue.
    pub fn retry_job(&self, id: i64) -> Result<Job> {
        let job = self.require_job(id)?;
        self.transition(id, job.job_type.queued_status(), None, None)
    }

    pub fn set_job_run(&self, id: i64, run_id: &str) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET run_id = ?1, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now') WHERE id = ?2",
                params![run_id, id],
            )
            .unavailable("Failed to set job run id")?;
        if changed == 0 {
            return Err(JobStoreError::JobNotFound { id }.into());
        }
        Ok(())
    }

    /// Refresh `updated_at` on a job the worker still owns. Returns false if
    /// the job is no longer started under this worker.
    pub fn heartbeat(&self, id: i64, worker_id: Option<&str>) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE id = ?1 AND status = 'started' AND assigned_to IS ?2",
                params![id, worker_id],
            )
            .unavailable("Failed to record heartbeat")?;
        Ok(changed == 1)
    }

    /// Return `started` jobs with no mutation for longer than `older_than`
    /// to their queue, clearing the assignment.
    pub fn reclaim_stale_jobs(&self, older_than: Duration) -> Result<Vec<Job>> {
        let modifier = format!("-{} seconds", older_than.as_secs());
        let sql = format!(
            "UPDATE jobs
             SET status = CASE job_type WHEN 'patch' THEN 'patch_pending' ELSE 'pending' END,
                 assigned_to = NULL,
                 updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
             WHERE status = 'started'
               AND updated_at < strftime('%Y-%m-%d %H:%M:%f', 'now', ?1)
             RETURNING {}",
            JOB_COLUMNS
        );
        self.immediate(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .unavailable("Failed to prepare reclaim")?;
            let rows = stmt
                .query_map(params![modifier], JobRow::from_row)
                .unavailable("Failed to reclaim stale jobs")?;
            let mut jobs = Vec::new();
            for row in rows {
                let r = row.unavailable("Failed to read reclaimed job")?;
                jobs.push(r.into_job()?);
            }
            Ok(jobs)
        })
    }

    // ── Workflow runs ─────────────────────────────────────────────────

    pub fn create_run(
        &self,
        run_id: &str,
        job_id: i64,
        workflow_type: &str,
        parent_run_id: Option<&str>,
    ) -> Result<WorkflowRun> {
        self.conn
            .execute(
                "INSERT INTO workflow_runs (run_id, job_id, workflow_type, parent_run_id)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(run_id) DO UPDATE SET
                     status = 'running', error = NULL, completed_at = NULL,
                     workflow_type = excluded.workflow_type",
                params![run_id, job_id, workflow_type, parent_run_id],
            )
            .unavailable("Failed to insert workflow run")?;
        self.get_run(run_id)?
            .context("Workflow run not found after insert")
    }

    pub fn finish_run(&self, run_id: &str, success: bool, error: Option<&str>) -> Result<()> {
        let status = if success {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        self.conn
            .execute(
                "UPDATE workflow_runs
                 SET status = ?1, error = ?2, completed_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE run_id = ?3",
                params![status.as_str(), error, run_id],
            )
            .unavailable("Failed to finish workflow run")?;
        // A step cut off by the workflow timeout never reports back.
        self.conn
            .execute(
                "UPDATE run_steps
                 SET status = 'failed', error = COALESCE(error, ?1),
                     completed_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE run_id = ?2 AND status = 'running'",
                params![error.unwrap_or("run ended before the step finished"), run_id],
            )
            .unavailable("Failed to close unfinished steps")?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<WorkflowRun>> {
        let sql = format!("SELECT {} FROM workflow_runs WHERE run_id = ?1", RUN_COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![run_id], RunRow::from_row)
            .optional()
            .unavailable("Failed to query workflow run")?;
        row.map(RunRow::into_run).transpose()
    }

    pub fn list_runs(&self, job_id: Option<i64>) -> Result<Vec<WorkflowRun>> {
        let sql = format!(
            "SELECT {} FROM workflow_runs WHERE (?1 IS NULL OR job_id = ?1) ORDER BY started_at, run_id",
            RUN_COLUMNS
        );
        let mut stmt = self
            .conn
            .prepare(&sql)
            .unavailable("Failed to prepare list_runs")?;
        let rows = stmt
            .query_map(params![job_id], RunRow::from_row)
            .unavailable("Failed to query workflow runs")?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.unavailable("Failed to read run row")?.into_run()?);
        }
        Ok(runs)
    }

    // ── Step ledger ───────────────────────────────────────────────────

    pub fn record_step_started(&self, run_id: &str, step_name: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO run_steps (run_id, step_name, status, attempts, started_at)
                 VALUES (?1, ?2, 'running', 1, strftime('%Y-%m-%d %H:%M:%f', 'now'))
                 ON CONFLICT(run_id, step_name) DO UPDATE SET
                     status = 'running',
                     attempts = attempts + 1,
                     error = NULL,
                     started_at = excluded.started_at,
                     completed_at = NULL",
                params![run_id, step_name],
            )
            .unavailable("Failed to record step start")?;
        Ok(())
    }

    pub fn record_step_finished(
        &self,
        run_id: &str,
        step_name: &str,
        status: StepStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE run_steps
                 SET status = ?1, error = ?2, completed_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
                 WHERE run_id = ?3 AND step_name = ?4",
                params![status.as_str(), error, run_id, step_name],
            )
            .unavailable("Failed to record step result")?;
        Ok(())
    }

    pub fn list_run_steps(&self, run_id: &str) -> Result<Vec<RunStep>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT run_id, step_name, status, attempts, error, started_at, completed_at
                 FROM run_steps WHERE run_id = ?1 ORDER BY id",
            )
            .unavailable("Failed to prepare list_run_steps")?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })
            .unavailable("Failed to query run steps")?;
        let mut steps = Vec::new();
        for row in rows {
            let (run_id, step_name, status, attempts, error, started_at, completed_at) =
                row.unavailable("Failed to read run step row")?;
            let status = StepStatus::from_str(&status)
                .map_err(|e| anyhow::anyhow!(e))
                .context("Invalid step status in database")?;
            steps.push(RunStep {
                run_id,
                step_name,
                status,
                attempts,
                error,
                started_at,
                completed_at,
            });
        }
        Ok(steps)
    }
}
