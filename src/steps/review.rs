use async_trait::async_trait;
use shipwright_common::{ReviewAddressedArtifact, ReviewArtifact, StepResult};
use tracing::{info, warn};

use super::StepServices;
use super::plan::active_plan;
use crate::util::{parse_agent_json, tail};
use crate::workflow::{ScratchKey, Step, WorkflowContext};

/// Asks the agent to review the working tree against the plan, if any.
pub struct Review {
    services: StepServices,
}

impl Review {
    pub const NAME: &'static str = "review";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for Review {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let plan = active_plan(ctx)
            .await?
            .map(|plan| format!("## Plan\n{}", plan))
            .unwrap_or_default();

        let prompt = format!(
            "Review the uncommitted and recent committed changes in this repository for \
             bugs, missing tests and deviations from the plan.\n\n{}\n\
             Reply with a single JSON object: {{\"summary\": \"...\", \"findings\": \
             [{{\"severity\": \"major|minor\", \"file\": \"path or null\", \
             \"description\": \"...\"}}]}}. Use an empty findings list if nothing needs fixing.",
            plan
        );
        let output = match self.services.ask_agent(Self::NAME, ctx, prompt).await {
            Ok(output) => output,
            Err(e) => return Ok(StepResult::fail(e)),
        };
        let review: ReviewArtifact = match parse_agent_json(&output) {
            Ok(review) => review,
            Err(e) => return Ok(StepResult::fail(format!("Unusable review: {:#}", e))),
        };

        let findings = review.findings.len();
        info!(run_id = %ctx.run_id(), findings, "Review complete");
        ctx.save_artifact(review).await?;
        Ok(StepResult::success().with_metadata("findings", findings))
    }
}

/// Number of fix passes made in this run so far.
const ITERATION: ScratchKey<u32> = ScratchKey::new("address_review.iteration");

/// Fixes review findings, then rewinds to `review` so the fixes get checked.
/// Stops rewinding once the review is clean or the iteration cap is reached.
pub struct AddressReview {
    services: StepServices,
}

impl AddressReview {
    pub const NAME: &'static str = "address_review";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }

    fn max_iterations(&self) -> u32 {
        self.services.config.toml.pipeline.max_review_iterations
    }
}

#[async_trait]
impl Step for AddressReview {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn rerun_target(&self) -> Option<&str> {
        Some(Review::NAME)
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let Some(review) = ctx.load_artifact::<ReviewArtifact>().await? else {
            return Ok(super::missing("review"));
        };
        let previous = ctx
            .get_or_load::<ReviewAddressedArtifact, _>(ITERATION, |a| a.iteration)
            .await?
            .unwrap_or(0);

        if review.is_clean() {
            info!(run_id = %ctx.run_id(), "Review is clean");
            ctx.save_artifact(ReviewAddressedArtifact {
                iteration: previous,
                addressed: 0,
                summary: "No findings".to_string(),
            })
            .await?;
            return Ok(StepResult::success().with_metadata("iteration", previous));
        }

        let iteration = previous + 1;
        let findings: Vec<String> = review
            .findings
            .iter()
            .map(|f| match &f.file {
                Some(file) => format!("- [{}] {}: {}", f.severity, file, f.description),
                None => format!("- [{}] {}", f.severity, f.description),
            })
            .collect();
        let prompt = format!(
            "Address these code review findings in the current repository and commit \
             the fixes.\n\n## Review summary\n{}\n\n## Findings\n{}\n\n\
             Summarize what you changed.",
            review.summary,
            findings.join("\n")
        );
        let output = match self.services.ask_agent(Self::NAME, ctx, prompt).await {
            Ok(output) => output,
            Err(e) => return Ok(StepResult::fail(e)),
        };

        ctx.save_artifact(ReviewAddressedArtifact {
            iteration,
            addressed: review.findings.len(),
            summary: tail(&output, 2000),
        })
        .await?;
        ctx.insert(ITERATION, iteration);

        let result = StepResult::success().with_metadata("iteration", iteration);
        if iteration < self.max_iterations() {
            Ok(result.with_rerun_from(Review::NAME))
        } else {
            warn!(
                run_id = %ctx.run_id(),
                iteration,
                "Review iteration limit reached; continuing without another review"
            );
            Ok(result)
        }
    }
}
