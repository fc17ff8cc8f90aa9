use async_trait::async_trait;
use shipwright_common::{ImplementationArtifact, StepResult};
use tracing::debug;

use super::plan::active_plan;
use super::{MISSING_ISSUE, StepServices, missing};
use crate::process::{ToolOutcome, run_tool};
use crate::util::tail;
use crate::workflow::{Step, WorkflowContext};

pub struct Implement {
    services: StepServices,
}

impl Implement {
    pub const NAME: &'static str = "implement";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }

    /// Paths `git status` reports as changed. Empty when git is unavailable.
    async fn changed_files(&self) -> Vec<String> {
        let outcome = run_tool(
            "git",
            &["status", "--porcelain"],
            &self.services.repo(),
            self.services.tool_timeout(),
        )
        .await;
        match outcome {
            Ok(ToolOutcome::Finished(out)) if out.success() => out
                .stdout
                .lines()
                .filter_map(|line| line.get(3..))
                .map(|path| path.trim().to_string())
                .filter(|path| !path.is_empty())
                .collect(),
            _ => {
                debug!("git status unavailable; not listing changed files");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Step for Implement {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let Some(job) = ctx.load_job().await? else {
            return Ok(StepResult::fail(MISSING_ISSUE));
        };
        let Some(plan) = active_plan(ctx).await? else {
            return Ok(missing("plan or patch plan"));
        };

        let prompt = format!(
            "Implement the following plan in the current repository. Make the code \
             changes and commit them with a descriptive message.\n\n\
             ## Issue #{}\n{}\n\n## Plan\n{}\n\
             When done, summarize what you changed.",
            job.id, job.description, plan
        );
        let output = match self.services.ask_agent(Self::NAME, ctx, prompt).await {
            Ok(output) => output,
            Err(e) => return Ok(StepResult::fail(e)),
        };

        let files_changed = self.changed_files().await;
        let count = files_changed.len();
        ctx.save_artifact(ImplementationArtifact {
            summary: tail(&output, 4000),
            files_changed,
        })
        .await?;
        Ok(StepResult::success().with_metadata("files_changed", count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::ScriptedAgent;
    use crate::steps::test_support::*;
    use shipwright_common::{PatchPlanArtifact, PlanArtifact};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_requires_a_plan() {
        let dir = TempDir::new().unwrap();
        let (services, agent) = services(ScriptedAgent::new(), dir.path());
        let (mut ctx, _) = context(&services, "Add caching").await;
        let result = Implement::new(services).run(&mut ctx).await.unwrap();
        assert!(result.error().unwrap().contains("plan"));
        assert!(agent.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_prefers_patch_plan() {
        let dir = TempDir::new().unwrap();
        let (services, agent) = services(ScriptedAgent::new().reply("Changed the TTL."), dir.path());
        let (mut ctx, _) = context(&services, "Tune cache").await;
        ctx.save_artifact(PlanArtifact {
            summary: "Original plan".into(),
            steps: vec![],
            raw: String::new(),
        })
        .await
        .unwrap();
        ctx.save_artifact(PatchPlanArtifact {
            summary: "Patch plan".into(),
            steps: vec!["bump ttl".into()],
            parent_run_id: None,
            raw: String::new(),
        })
        .await
        .unwrap();

        let result = Implement::new(services).run(&mut ctx).await.unwrap();
        assert!(result.is_success());
        let prompt = &agent.prompts()[0];
        assert!(prompt.contains("Patch plan"));
        assert!(prompt.contains("1. bump ttl"));
        assert!(!prompt.contains("Original plan"));

        let saved = ctx
            .load_artifact::<ImplementationArtifact>()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.summary, "Changed the TTL.");
    }
}
