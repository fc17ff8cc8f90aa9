use async_trait::async_trait;
use shipwright_common::{IssueArtifact, StepResult};
use tracing::info;

use super::StepServices;
use crate::errors::is_store_outage;
use crate::workflow::{Step, WorkflowContext};

/// Loads the job from the store and snapshots it as the `issue` artifact.
pub struct FetchIssue {
    services: StepServices,
}

impl FetchIssue {
    pub const NAME: &'static str = "fetch_issue";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for FetchIssue {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let job_id = ctx.job_id();
        let job = match self.services.jobs.call(move |db| db.require_job(job_id)).await {
            Ok(job) => job,
            Err(e) if is_store_outage(&e) => return Err(e),
            Err(e) => return Ok(StepResult::fail(format!("{:#}", e))),
        };

        info!(job_id, title = job.title(), "Fetched issue");
        let title = job.title().to_string();
        ctx.set_job(job.clone());
        ctx.save_artifact(IssueArtifact { job }).await?;
        Ok(StepResult::success().with_metadata("title", title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::ScriptedAgent;
    use crate::steps::test_support::*;
    use crate::workflow::WorkflowContext;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_snapshots_job_as_issue() {
        let dir = TempDir::new().unwrap();
        let (services, _) = services(ScriptedAgent::new(), dir.path());
        let (ctx, job) = context(&services, "Add dark mode\n\nUsers keep asking.").await;
        let store = ctx.artifacts().unwrap().clone();
        let mut ctx = WorkflowContext::new("run1", job.id).with_artifacts(store.clone());

        let result = FetchIssue::new(services).run(&mut ctx).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.metadata()["title"], "Add dark mode");

        let issue: IssueArtifact = store.read_artifact("run1").await.unwrap();
        assert_eq!(issue.job.id, job.id);
        assert_eq!(ctx.job().unwrap().id, job.id);
    }

    #[tokio::test]
    async fn test_unknown_job_is_a_failed_result() {
        let dir = TempDir::new().unwrap();
        let (services, _) = services(ScriptedAgent::new(), dir.path());
        let mut ctx = WorkflowContext::new("run1", 404);
        let result = FetchIssue::new(services).run(&mut ctx).await.unwrap();
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("404"));
    }
}
