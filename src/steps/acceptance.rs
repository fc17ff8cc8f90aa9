use async_trait::async_trait;
use shipwright_common::{AcceptanceArtifact, ImplementationArtifact, StepResult};

use super::plan::active_plan;
use super::{MISSING_ISSUE, StepServices, missing};
use crate::util::parse_agent_json;
use crate::workflow::{Step, WorkflowContext};

/// Final gate: the agent checks the result against the issue and the plan.
pub struct Acceptance {
    services: StepServices,
}

impl Acceptance {
    pub const NAME: &'static str = "acceptance";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for Acceptance {
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
        let implementation = ctx
            .load_artifact::<ImplementationArtifact>()
            .await?
            .map(|i| format!("## Implementation notes\n{}\n\n", i.summary))
            .unwrap_or_default();

        let prompt = format!(
            "Decide whether the changes in this repository satisfy the issue and the \
             plan below. Do not modify any files.\n\n\
             ## Issue #{}\n{}\n\n## Plan\n{}\n{}\
             Reply with a single JSON object: {{\"accepted\": true | false, \"notes\": \"...\"}}",
            job.id, job.description, plan, implementation
        );
        let output = match self.services.ask_agent(Self::NAME, ctx, prompt).await {
            Ok(output) => output,
            Err(e) => return Ok(StepResult::fail(e)),
        };
        let verdict: AcceptanceArtifact = match parse_agent_json(&output) {
            Ok(v) => v,
            Err(e) => return Ok(StepResult::fail(format!("Unusable acceptance verdict: {:#}", e))),
        };

        let accepted = verdict.accepted;
        let notes = verdict.notes.clone();
        ctx.save_artifact(verdict).await?;
        if accepted {
            Ok(StepResult::success().with_metadata("accepted", true))
        } else {
            Ok(StepResult::fail(format!("Acceptance criteria not met: {}", notes))
                .with_metadata("accepted", false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::ScriptedAgent;
    use crate::steps::test_support::*;
    use shipwright_common::PlanArtifact;
    use tempfile::TempDir;

    async fn with_plan(ctx: &mut WorkflowContext) {
        ctx.save_artifact(PlanArtifact {
            summary: "Add an LRU cache".into(),
            steps: vec!["add type".into()],
            raw: String::new(),
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_accepted() {
        let dir = TempDir::new().unwrap();
        let agent = ScriptedAgent::new().reply(r#"{"accepted": true, "notes": "all good"}"#);
        let (services, _) = services(agent, dir.path());
        let (mut ctx, _) = context(&services, "Add caching").await;
        with_plan(&mut ctx).await;

        let step = Acceptance::new(services);
        assert!(step.is_critical());
        let result = step.run(&mut ctx).await.unwrap();
        assert!(result.is_success());
        let saved = ctx.load_artifact::<AcceptanceArtifact>().await.unwrap().unwrap();
        assert_eq!(saved.notes, "all good");
    }

    #[tokio::test]
    async fn test_rejected_is_a_failure_with_notes() {
        let dir = TempDir::new().unwrap();
        let agent =
            ScriptedAgent::new().reply(r#"{"accepted": false, "notes": "eviction is missing"}"#);
        let (services, _) = services(agent, dir.path());
        let (mut ctx, _) = context(&services, "Add caching").await;
        with_plan(&mut ctx).await;

        let result = Acceptance::new(services).run(&mut ctx).await.unwrap();
        assert_eq!(
            result.error(),
            Some("Acceptance criteria not met: eviction is missing")
        );
        // The verdict is kept for the record even when negative.
        assert!(
            ctx.load_artifact::<AcceptanceArtifact>()
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_requires_a_plan() {
        let dir = TempDir::new().unwrap();
        let (services, agent) = services(ScriptedAgent::new(), dir.path());
        let (mut ctx, _) = context(&services, "Add caching").await;
        let result = Acceptance::new(services).run(&mut ctx).await.unwrap();
        assert!(!result.is_success());
        assert!(agent.prompts().is_empty());
    }
}
