use async_trait::async_trait;
use shipwright_common::{
    AcceptanceArtifact, BranchArtifact, ImplementationArtifact, IssueArtifact, Job,
    PrMetadataArtifact, PullRequestArtifact, StepResult,
};
use tracing::info;

use super::plan::active_plan;
use super::{StepServices, missing};
use crate::config::Platform;
use crate::process::run_checked;
use crate::workflow::{Step, WorkflowContext};

const MAX_TITLE_CHARS: usize = 72;

fn pr_title(job: &Job) -> String {
    let title = job.title();
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title.to_string();
    }
    let cut: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
    format!("{}...", cut.trim_end())
}

fn pr_body(
    job: &Job,
    plan: Option<&str>,
    implementation: Option<&ImplementationArtifact>,
    acceptance: &AcceptanceArtifact,
) -> String {
    let mut body = format!("## Issue\n{}\n", job.description);
    if let Some(plan) = plan {
        body.push_str(&format!("\n## Plan\n{}", plan));
    }
    if let Some(implementation) = implementation {
        body.push_str(&format!("\n## Changes\n{}\n", implementation.summary));
        if !implementation.files_changed.is_empty() {
            body.push('\n');
            for file in &implementation.files_changed {
                body.push_str(&format!("- `{}`\n", file));
            }
        }
    }
    if !acceptance.notes.is_empty() {
        body.push_str(&format!("\n## Acceptance\n{}\n", acceptance.notes));
    }
    body.push_str(&format!("\nJob #{}\n", job.id));
    body
}

/// Assembles the pull request title and body from the run's artifacts.
/// Deterministic; no agent involved.
pub struct PreparePr;

impl PreparePr {
    pub const NAME: &'static str = "prepare_pr";
}

#[async_trait]
impl Step for PreparePr {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let Some(issue) = ctx.load_artifact::<IssueArtifact>().await? else {
            return Ok(missing("issue"));
        };
        let Some(acceptance) = ctx.load_artifact::<AcceptanceArtifact>().await? else {
            return Ok(missing("acceptance"));
        };
        let plan = active_plan(ctx).await?;
        let implementation = ctx.load_artifact::<ImplementationArtifact>().await?;

        let metadata = PrMetadataArtifact {
            title: pr_title(&issue.job),
            body: pr_body(&issue.job, plan.as_deref(), implementation.as_ref(), &acceptance),
        };
        let title = metadata.title.clone();
        ctx.save_artifact(metadata).await?;
        Ok(StepResult::success().with_metadata("title", title))
    }
}

/// Pushes the branch and opens a pull (merge) request with `gh` or `glab`.
pub struct CreatePr {
    services: StepServices,
}

impl CreatePr {
    pub const NAME: &'static str = "create_pr";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }

    async fn open(
        &self,
        platform: Platform,
        branch: &BranchArtifact,
        metadata: &PrMetadataArtifact,
    ) -> anyhow::Result<String> {
        let repo = self.services.repo();
        let limit = self.services.tool_timeout();
        run_checked("git", &["push", "-u", "origin", &branch.name], &repo, limit).await?;

        let args: Vec<&str> = match platform {
            Platform::Github => vec![
                "pr",
                "create",
                "--title",
                metadata.title.as_str(),
                "--body",
                metadata.body.as_str(),
                "--base",
                branch.base.as_str(),
                "--head",
                branch.name.as_str(),
            ],
            Platform::Gitlab => vec![
                "mr",
                "create",
                "--title",
                metadata.title.as_str(),
                "--description",
                metadata.body.as_str(),
                "--target-branch",
                branch.base.as_str(),
                "--source-branch",
                branch.name.as_str(),
                "--yes",
            ],
        };
        let stdout = run_checked(platform.cli(), &args, &repo, limit).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl Step for CreatePr {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let Some(platform) = self.services.config.toml.pipeline.platform else {
            return Ok(StepResult::fail("No platform configured; set pipeline.platform"));
        };
        let Some(metadata) = ctx.load_artifact::<PrMetadataArtifact>().await? else {
            return Ok(missing("pull request metadata"));
        };
        let Some(branch) = ctx.load_artifact::<BranchArtifact>().await? else {
            return Ok(missing("branch"));
        };

        let url = match self.open(platform, &branch, &metadata).await {
            Ok(url) => url,
            Err(e) => {
                return Ok(StepResult::fail(format!(
                    "Failed to open pull request: {:#}",
                    e
                )));
            }
        };
        info!(run_id = %ctx.run_id(), url = %url, "Pull request opened");
        ctx.save_artifact(PullRequestArtifact {
            url: url.clone(),
            platform: platform.as_str().to_string(),
        })
        .await?;
        Ok(StepResult::success().with_metadata("url", url))
    }
}

/// Pushes follow-up commits to the branch of an existing pull request.
pub struct UpdatePr {
    services: StepServices,
}

impl UpdatePr {
    pub const NAME: &'static str = "update_pr";

    pub fn new(services: StepServices) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for UpdatePr {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_critical(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &mut WorkflowContext) -> anyhow::Result<StepResult> {
        let Some(branch) = ctx.load_artifact::<BranchArtifact>().await? else {
            return Ok(missing("branch"));
        };
        if let Err(e) = run_checked(
            "git",
            &["push", "origin", &branch.name],
            &self.services.repo(),
            self.services.tool_timeout(),
        )
        .await
        {
            return Ok(StepResult::fail(format!(
                "Failed to push {}: {:#}",
                branch.name, e
            )));
        }
        info!(run_id = %ctx.run_id(), branch = %branch.name, "Pushed follow-up commits");
        Ok(StepResult::success().with_metadata("branch", branch.name))
    }
}
