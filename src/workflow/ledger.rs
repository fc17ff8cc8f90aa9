use async_trait::async_trait;
use shipwright_common::StepResult;
use tracing::warn;

use super::pipeline::RunObserver;
use crate::jobs::{DbHandle, StepStatus};

/// Persists step progress into `run_steps`. Write failures are logged and
/// never interrupt the run.
#[derive(Clone)]
pub struct StepLedger {
    db: DbHandle,
}

impl StepLedger {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RunObserver for StepLedger {
    async fn step_started(&self, run_id: &str, step: &str) {
        let (run, name) = (run_id.to_string(), step.to_string());
        if let Err(e) = self
            .db
            .call(move |db| db.record_step_started(&run, &name))
            .await
        {
            warn!(run_id, step, "Failed to record step start: {:#}", e);
        }
    }

    async fn step_finished(&self, run_id: &str, step: &str, result: &StepResult) {
        let (run, name) = (run_id.to_string(), step.to_string());
        let status = if result.is_success() {
            StepStatus::Succeeded
        } else {
            StepStatus::Failed
        };
        let error = result.error().map(str::to_string);
        if let Err(e) = self
            .db
            .call(move |db| db.record_step_finished(&run, &name, status, error.as_deref()))
            .await
        {
            warn!(run_id, step, "Failed to record step result: {:#}", e);
        }
    }
}
