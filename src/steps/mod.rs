//! Built-in steps and the pipelines assembled from them.
//!
//! Steps are thin: they gather inputs through the workflow context, ask the
//! agent or run a tool, and persist one artifact. Anything that goes wrong
//! in the agent or a tool is reported as a failed [`StepResult`].

mod acceptance;
mod branch;
mod classify;
mod implement;
mod issue;
mod plan;
mod pr;
mod quality;
mod review;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use shipwright_common::StepResult;

use crate::agent::{AgentRequest, AgentRunner};
use crate::config::ShipwrightConfig;
use crate::errors::RegistryError;
use crate::jobs::DbHandle;
use crate::workflow::{PipelineSource, Step, WorkflowContext, WorkflowRegistry, step_factory};

pub use acceptance::Acceptance;
pub use branch::SetupBranch;
pub use classify::Classify;
pub use implement::Implement;
pub use issue::FetchIssue;
pub use plan::{PatchPlan, Plan};
pub use pr::{CreatePr, PreparePr, UpdatePr};
pub use quality::CodeQuality;
pub use review::{AddressReview, Review};

/// Everything a step may reach outside the workflow context.
#[derive(Clone)]
pub struct StepServices {
    pub jobs: DbHandle,
    pub agent: Arc<dyn AgentRunner>,
    pub config: Arc<ShipwrightConfig>,
}

impl StepServices {
    pub fn new(jobs: DbHandle, agent: Arc<dyn AgentRunner>, config: Arc<ShipwrightConfig>) -> Self {
        Self {
            jobs,
            agent,
            config,
        }
    }

    pub fn repo(&self) -> PathBuf {
        self.config.repo_path()
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.config.toml.tools.timeout_secs)
    }

    /// Ask the agent on behalf of `step`. `Err` carries a message fit for a
    /// failed step result.
    pub async fn ask_agent(
        &self,
        step: &str,
        ctx: &WorkflowContext,
        prompt: String,
    ) -> Result<String, String> {
        let request = AgentRequest::new(step, ctx.run_id(), self.repo(), prompt);
        self.agent
            .invoke(&request)
            .await
            .map(|response| response.output)
            .map_err(|e| e.to_string())
    }
}

pub(crate) const MISSING_ISSUE: &str = "No issue available for this run; run fetch_issue first";

pub(crate) fn missing(what: &str) -> StepResult {
    StepResult::fail(format!("No {} available for this run", what))
}

// ── Built-in pipelines ────────────────────────────────────────────────

fn main_steps(services: &StepServices) -> Vec<Box<dyn Step>> {
    let s = services;
    let mut steps: Vec<Box<dyn Step>> = vec![
        Box::new(FetchIssue::new(s.clone())),
        Box::new(SetupBranch::new(s.clone())),
        Box::new(Classify::new(s.clone())),
        Box::new(Plan::new(s.clone())),
        Box::new(Implement::new(s.clone())),
        Box::new(Review::new(s.clone())),
        Box::new(AddressReview::new(s.clone())),
        Box::new(CodeQuality::new(s.clone())),
        Box::new(Acceptance::new(s.clone())),
        Box::new(PreparePr),
    ];
    if s.config.toml.pipeline.platform.is_some() {
        steps.push(Box::new(CreatePr::new(s.clone())));
    }
    steps
}

/// Registry with the `main`, `patch` and `codereview` workflows.
pub fn builtin_registry(services: StepServices) -> Result<WorkflowRegistry, RegistryError> {
    let s = services;

    let main = {
        let s = s.clone();
        PipelineSource::Dynamic(Arc::new(move || main_steps(&s)))
    };

    let patch = PipelineSource::Static(vec![
        step_factory({
            let s = s.clone();
            move || FetchIssue::new(s.clone())
        }),
        step_factory({
            let s = s.clone();
            move || SetupBranch::new(s.clone())
        }),
        step_factory({
            let s = s.clone();
            move || PatchPlan::new(s.clone())
        }),
        step_factory({
            let s = s.clone();
            move || Implement::new(s.clone())
        }),
        step_factory({
            let s = s.clone();
            move || Review::new(s.clone())
        }),
        step_factory({
            let s = s.clone();
            move || AddressReview::new(s.clone())
        }),
        step_factory({
            let s = s.clone();
            move || CodeQuality::new(s.clone())
        }),
        step_factory({
            let s = s.clone();
            move || Acceptance::new(s.clone())
        }),
        step_factory({
            let s = s.clone();
            move || UpdatePr::new(s.clone())
        }),
    ]);

    let codereview = PipelineSource::Static(vec![
        step_factory({
            let s = s.clone();
            move || Review::new(s.clone())
        }),
        step_factory({
            let s = s.clone();
            move || AddressReview::new(s.clone())
        }),
        step_factory({
            let s = s.clone();
            move || CodeQuality::new(s.clone())
        }),
    ]);

    Ok(WorkflowRegistry::builder()
        .register(
            "main",
            "Issue to pull request: classify, plan, implement, review, accept",
            main,
        )?
        .register(
            "patch",
            "Follow-up change on a finished job, pushed to the existing branch",
            patch,
        )?
        .register(
            "codereview",
            "Review and fix the current working tree",
            codereview,
        )?
        .build())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::agent::testing::ScriptedAgent;
    use crate::config::Platform;
    use crate::workflow::StepCatalog;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_types() {
        let dir = TempDir::new().unwrap();
        let (services, _) = services(ScriptedAgent::new(), dir.path());
        let registry = builtin_registry(services).unwrap();
        assert_eq!(registry.list_types(), vec!["codereview", "main", "patch"]);
    }

    #[test]
    fn test_main_adds_create_pr_only_with_platform() {
        let dir = TempDir::new().unwrap();
        let (services_plain, _) = services(ScriptedAgent::new(), dir.path());
        let main = builtin_registry(services_plain).unwrap().resolve("main").unwrap();
        assert_eq!(main.names().last(), Some(&"prepare_pr"));
        assert!(main.index_of("create_pr").is_none());

        let mut cfg = config(dir.path());
        cfg.toml.pipeline.platform = Some(Platform::Github);
        let (services_gh, _) = services_with(ScriptedAgent::new(), cfg);
        let main = builtin_registry(services_gh).unwrap().resolve("main").unwrap();
        assert_eq!(main.names().last(), Some(&"create_pr"));
    }

    #[test]
    fn test_pipeline_orders() {
        let dir = TempDir::new().unwrap();
        let (services, _) = services(ScriptedAgent::new(), dir.path());
        let registry = builtin_registry(services).unwrap();
        assert_eq!(
            registry.resolve("patch").unwrap().names(),
            vec![
                "fetch_issue",
                "setup_branch",
                "patch_plan",
                "implement",
                "review",
                "address_review",
                "code_quality",
                "acceptance",
                "update_pr"
            ]
        );
        assert_eq!(
            registry.resolve("codereview").unwrap().names(),
            vec!["review", "address_review", "code_quality"]
        );
    }

    #[test]
    fn test_steps_agree_with_catalog() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(dir.path());
        cfg.toml.pipeline.platform = Some(Platform::Gitlab);
        let (services, _) = services_with(ScriptedAgent::new(), cfg);
        let registry = builtin_registry(services).unwrap();
        let catalog = StepCatalog::builtin();
        for workflow in registry.list_types() {
            for step in registry.resolve(&workflow).unwrap().steps() {
                let spec = catalog
                    .get(step.name())
                    .unwrap_or_else(|| panic!("{} missing from catalog", step.name()));
                assert_eq!(spec.critical, step.is_critical(), "{}", step.name());
            }
        }
    }
}
