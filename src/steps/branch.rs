use async_trait::async_trait;
use shipwright_common::{BranchArtifact, Job, StepResult};
use tracing::info;

use super::{MISSING_ISSUE, StepServices};
use crate::process::{ToolOutcome, run_checked, run_tool};
use crate::util::slugify;
use crate::workflow::{Step, WorkflowContext};

const BRANCH_PREFIX: &str = "shipwright";

/// `shipwright/job-<id>-<slug of the title>`.
pub fn branch_name(job: &Job) -> String {
    let slug = slugify(job.title(), 40);
    if slug.is_empty() {
        format!("{}/job-{}", BRANCH_PREFIX, job.id)
    } else {
        format!("{}/job-{}-{}", BRANCH_PREFIX, job.id, slug)
    }
}

/// Creates (or re-enters) the job's working branch. Patch runs reuse the
/// parent run's branch so their commits land on the existing pull request.
pub struct SetupBranch {
    services: StepServices,
}

impl SetupBranch {
    pub const NAME: &'static str = "setup_branch";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }

    async fn branch_exists(&self, name: &str) -> anyhow::Result<bool> {
        let reference = format!("refs/heads/{}", name);
        let outcome = run_tool(
            "git",
            &["rev-parse", "--verify", "--quiet", &reference],
            &self.services.repo(),
            self.services.tool_timeout(),
        )
        .await?;
        Ok(matches!(outcome, ToolOutcome::Finished(out) if out.success()))
    }

    async fn checkout(&self, branch: &BranchArtifact) -> anyhow::Result<()> {
        let repo = self.services.repo();
        let limit = self.services.tool_timeout();
        if self.branch_exists(&branch.name).await? {
            run_checked("git", &["checkout", &branch.name], &repo, limit).await?;
        } else {
            run_checked(
                "git",
                &["checkout", "-b", &branch.name, &branch.base],
                &repo,
                limit,
            )
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Step for SetupBranch {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let Some(job) = ctx.load_job().await? else {
            return Ok(StepResult::fail(MISSING_ISSUE));
        };

        let branch = match ctx.get_or_load_from_parent::<BranchArtifact>().await? {
            Some(parent) => parent,
            None => BranchArtifact {
                name: branch_name(&job),
                base: self.services.config.toml.pipeline.base_branch.clone(),
            },
        };

        if let Err(e) = self.checkout(&branch).await {
            return Ok(StepResult::fail(format!(
                "Failed to set up branch {}: {:#}",
                branch.name, e
            )));
        }
        info!(run_id = %ctx.run_id(), branch = %branch.name, "Working branch ready");
        let name = branch.name.clone();
        ctx.save_artifact(branch).await?;
        Ok(StepResult::success().with_metadata("branch", name))
    }
}
