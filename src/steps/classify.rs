use async_trait::async_trait;
use shipwright_common::{ClassificationArtifact, StepResult};

use super::{MISSING_ISSUE, StepServices};
use crate::util::parse_agent_json;
use crate::workflow::{Step, WorkflowContext};

pub struct Classify {
    services: StepServices,
}

impl Classify {
    pub const NAME: &'static str = "classify";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for Classify {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let Some(job) = ctx.load_job().await? else {
            return Ok(StepResult::fail(MISSING_ISSUE));
        };

        let prompt = format!(
            "Classify the following issue as a feature, bug or chore.\n\n\
             ## Issue #{}\n{}\n\n\
             Reply with a single JSON object: \
             {{\"kind\": \"feature\" | \"bug\" | \"chore\", \"summary\": \"one sentence\"}}",
            job.id, job.description
        );
        let output = match self.services.ask_agent(Self::NAME, ctx, prompt).await {
            Ok(output) => output,
            Err(e) => return Ok(StepResult::fail(e)),
        };
        let classification: ClassificationArtifact = match parse_agent_json(&output) {
            Ok(c) => c,
            Err(e) => return Ok(StepResult::fail(format!("Unusable classification: {:#}", e))),
        };

        let kind = classification.kind.as_str();
        ctx.save_artifact(classification).await?;
        Ok(StepResult::success().with_metadata("kind", kind))
    }
}
