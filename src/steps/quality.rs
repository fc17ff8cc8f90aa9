use std::time::Duration;

use async_trait::async_trait;
use shipwright_common::{QualityCheck, QualityCheckArtifact, StepResult};
use tracing::{info, warn};

use super::StepServices;
use crate::process::{ToolOutcome, run_shell};
use crate::util::tail;
use crate::workflow::{Step, WorkflowContext};

/// Runs the configured `[quality] commands` in the repository.
///
/// Best-effort: a failing check is recorded and logged but does not stop
/// the run.
pub struct CodeQuality {
    services: StepServices,
}

impl CodeQuality {
    pub const NAME: &'static str = "code_quality";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }

    async fn check(&self, command: &str, limit: Duration) -> QualityCheck {
        let (passed, output) = match run_shell(command, &self.services.repo(), limit).await {
            Ok(ToolOutcome::Finished(out)) => {
                let combined = format!("{}{}", out.stdout, out.stderr);
                (out.success(), tail(&combined, 4000))
            }
            Ok(ToolOutcome::TimedOut) => {
                (false, format!("timed out after {}s", limit.as_secs()))
            }
            Err(e) => (false, format!("{:#}", e)),
        };
        QualityCheck {
            command: command.to_string(),
            passed,
            output,
        }
    }
}

#[async_trait]
impl Step for CodeQuality {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let quality = &self.services.config.toml.quality;
        let limit = Duration::from_secs(quality.timeout_secs);

        let mut checks = Vec::with_capacity(quality.commands.len());
        for command in &quality.commands {
            let check = self.check(command, limit).await;
            if check.passed {
                info!(run_id = %ctx.run_id(), command = %check.command, "Quality check passed");
            } else {
                warn!(run_id = %ctx.run_id(), command = %check.command, "Quality check failed");
            }
            checks.push(check);
        }

        let total = checks.len();
        let failed: Vec<String> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.command.clone())
            .collect();
        ctx.save_artifact(QualityCheckArtifact { checks }).await?;

        if failed.is_empty() {
            Ok(StepResult::success().with_metadata("checks", total))
        } else {
            Ok(StepResult::fail(format!(
                "{} of {} quality checks failed: {}",
                failed.len(),
                total,
                failed.join(", ")
            ))
            .with_metadata("checks", total))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::ScriptedAgent;
    use crate::steps::test_support::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_no_commands_is_success() {
        let dir = TempDir::new().unwrap();
        let (services, _) = services(ScriptedAgent::new(), dir.path());
        let (mut ctx, _) = context(&services, "Add caching").await;
        let result = CodeQuality::new(services).run(&mut ctx).await.unwrap();
        assert!(result.is_success());
        let saved = ctx
            .load_artifact::<QualityCheckArtifact>()
            .await
            .unwrap()
            .unwrap();
        assert!(saved.checks.is_empty());
    }

    #[tokio::test]
    async fn test_failing_command_is_recorded() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.toml.quality.commands = vec!["true".into(), "echo broken >&2; exit 3".into()];
        let (services, _) = services_with(ScriptedAgent::new(), cfg);
        let (mut ctx, _) = context(&services, "Add caching").await;

        let step = CodeQuality::new(services);
        assert!(!step.is_critical());
        let result = step.run(&mut ctx).await.unwrap();
        assert_eq!(
            result.error(),
            Some("1 of 2 quality checks failed: echo broken >&2; exit 3")
        );

        let saved = ctx
            .load_artifact::<QualityCheckArtifact>()
            .await
            .unwrap()
            .unwrap();
        assert!(saved.checks[0].passed);
        assert!(!saved.checks[1].passed);
        assert!(saved.checks[1].output.contains("broken"));
    }

    #[tokio::test]
    async fn test_slow_command_times_out() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.toml.quality.commands = vec!["sleep 5".into()];
        cfg.toml.quality.timeout_secs = 1;
        let (services, _) = services_with(ScriptedAgent::new(), cfg);
        let (mut ctx, _) = context(&services, "Add caching").await;

        let result = CodeQuality::new(services).run(&mut ctx).await.unwrap();
        assert!(!result.is_success());
        let saved = ctx
            .load_artifact::<QualityCheckArtifact>()
            .await
            .unwrap()
            .unwrap();
        assert!(saved.checks[0].output.contains("timed out"));
    }
}
