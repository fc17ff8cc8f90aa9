use async_trait::async_trait;
use serde::Deserialize;
use shipwright_common::{
    ClassificationArtifact, PatchPlanArtifact, PlanArtifact, StepResult,
};
use tracing::warn;

use super::{MISSING_ISSUE, StepServices, missing};
use crate::errors::ArtifactError;
use crate::util::parse_agent_json;
use crate::workflow::{Step, WorkflowContext};

#[derive(Debug, Deserialize)]
struct PlanReply {
    summary: String,
    #[serde(default)]
    steps: Vec<String>,
}

const REPLY_FORMAT: &str = "Finish with a single JSON object: \
     {\"summary\": \"one paragraph\", \"steps\": [\"step 1\", \"step 2\"]}";

/// Structured plan from agent output. Falls back to the first line as the
/// summary when no JSON object is present.
fn parse_plan(output: &str) -> (String, Vec<String>) {
    match parse_agent_json::<PlanReply>(output) {
        Ok(reply) => (reply.summary, reply.steps),
        Err(e) => {
            warn!("Plan reply had no usable JSON, keeping raw text: {:#}", e);
            let summary = output
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or_default()
                .to_string();
            (summary, Vec::new())
        }
    }
}

/// Markdown rendering shared by the steps that consume a plan.
pub(crate) fn render_steps(summary: &str, steps: &[String]) -> String {
    let mut out = format!("{}\n", summary);
    for (i, step) in steps.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, step));
    }
    out
}

/// The plan the current run works from: its patch plan when there is one,
/// otherwise the main plan. Rendered as markdown.
pub(crate) async fn active_plan(
    ctx: &mut WorkflowContext,
) -> Result<Option<String>, ArtifactError> {
    if let Some(patch) = ctx.load_artifact::<PatchPlanArtifact>().await? {
        return Ok(Some(render_steps(&patch.summary, &patch.steps)));
    }
    Ok(ctx
        .load_artifact::<PlanArtifact>()
        .await?
        .map(|plan| render_steps(&plan.summary, &plan.steps)))
}

pub struct Plan {
    services: StepServices,
}

impl Plan {
    pub const NAME: &'static str = "plan";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for Plan {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let Some(job) = ctx.load_job().await? else {
            return Ok(StepResult::fail(MISSING_ISSUE));
        };
        let Some(classification) = ctx.load_artifact::<ClassificationArtifact>().await? else {
            return Ok(missing("classification"));
        };

        let prompt = format!(
            "Write an implementation plan for this {} in the current repository. \
             Do not change any files yet.\n\n\
             ## Issue #{}\n{}\n\n## Classification\n{}\n\n{}",
            classification.kind.as_str(),
            job.id,
            job.description,
            classification.summary,
            REPLY_FORMAT
        );
        let output = match self.services.ask_agent(Self::NAME, ctx, prompt).await {
            Ok(output) => output,
            Err(e) => return Ok(StepResult::fail(e)),
        };
        let (summary, steps) = parse_plan(&output);
        let step_count = steps.len();
        ctx.save_artifact(PlanArtifact {
            summary,
            steps,
            raw: output,
        })
        .await?;
        Ok(StepResult::success().with_metadata("steps", step_count))
    }
}

/// Plans a follow-up change. Reads the parent run's plan when there is one
/// and degrades to planning from the description alone otherwise.
pub struct PatchPlan {
    services: StepServices,
}

impl PatchPlan {
    pub const NAME: &'static str = "patch_plan";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for PatchPlan {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let Some(job) = ctx.load_job().await? else {
            return Ok(StepResult::fail(MISSING_ISSUE));
        };
        let parent_plan = ctx.get_or_load_from_parent::<PlanArtifact>().await?;
        if parent_plan.is_none() {
            warn!(run_id = %ctx.run_id(), "No parent plan; planning the patch from the description only");
        }

        let context = match &parent_plan {
            Some(plan) => format!(
                "## Original plan (already implemented)\n{}",
                render_steps(&plan.summary, &plan.steps)
            ),
            None => "The original plan is not available.".to_string(),
        };
        let prompt = format!(
            "The work for this issue was already implemented on the current branch. \
             Plan the follow-up change requested below. Do not change any files yet.\n\n\
             ## Request (issue #{})\n{}\n\n{}\n\n{}",
            job.id, job.description, context, REPLY_FORMAT
        );
        let output = match self.services.ask_agent(Self::NAME, ctx, prompt).await {
            Ok(output) => output,
            Err(e) => return Ok(StepResult::fail(e)),
        };
        let (summary, steps) = parse_plan(&output);
        let degraded = parent_plan.is_none();
        let parent_run_id = if degraded {
            None
        } else {
            ctx.parent_run_id().map(str::to_string)
        };
        ctx.save_artifact(PatchPlanArtifact {
            summary,
            steps,
            parent_run_id,
            raw: output,
        })
        .await?;
        Ok(StepResult::success().with_metadata("degraded", degraded))
    }
}
