use async_trait::async_trait;
use shipwright_common::StepResult;

use super::context::WorkflowContext;

/// One unit of pipeline logic.
///
/// `run` may be invoked more than once within a run (reruns, retries from
/// the CLI); re-running must overwrite earlier artifacts rather than add to
/// them. Ordinary failures are returned as a failed [`StepResult`]; an `Err`
/// is reserved for faults the step cannot classify itself.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    /// A critical step's failure aborts the run.
    fn is_critical(&self) -> bool {
        true
    }

    /// The step this one may rewind to, if any. Checked when a pipeline is
    /// assembled.
    fn rerun_target(&self) -> Option<&str> {
        None
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult>;
}
