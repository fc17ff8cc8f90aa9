//! Ordered step execution with criticality and bounded reruns.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use shipwright_common::StepResult;
use tracing::{debug, error, info, warn};

use super::context::WorkflowContext;
use super::step::Step;
use crate::errors::{PipelineError, RegistryError, is_store_outage};

/// Rewinds allowed per run, summed over all steps.
pub const MAX_RERUNS: u32 = 5;

/// A validated, ordered list of steps.
pub struct Pipeline {
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    /// Rejects duplicate step names and declared rerun targets that are
    /// missing or come later in the list.
    pub fn new(steps: Vec<Box<dyn Step>>) -> Result<Self, RegistryError> {
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            if positions.insert(step.name(), i).is_some() {
                return Err(RegistryError::DuplicateStepName(step.name().to_string()));
            }
        }
        for (i, step) in steps.iter().enumerate() {
            if let Some(target) = step.rerun_target() {
                match positions.get(target) {
                    Some(&j) if j <= i => {}
                    _ => {
                        return Err(RegistryError::InvalidDeclaredRerunTarget {
                            step: step.name().to_string(),
                            target: target.to_string(),
                        });
                    }
                }
            }
        }
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<&dyn Step> {
        self.steps
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Hooks fired as the runner moves through a pipeline. All default to no-ops.
#[async_trait]
pub trait RunObserver: Send + Sync {
    async fn step_started(&self, _run_id: &str, _step: &str) {}

    async fn step_finished(&self, _run_id: &str, _step: &str, _result: &StepResult) {}

    async fn rerun_requested(&self, _run_id: &str, _from: &str, _to: &str, _count: u32) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: String,
    pub error: String,
}

/// What happened during a run that finished without aborting.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Step names in invocation order, repeats included.
    pub invocations: Vec<String>,
    pub best_effort_failures: Vec<StepFailure>,
    pub reruns: u32,
}

pub struct PipelineRunner {
    max_reruns: u32,
    observer: Option<Arc<dyn RunObserver>>,
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self::new(MAX_RERUNS)
    }
}

impl PipelineRunner {
    pub fn new(max_reruns: u32) -> Self {
        Self {
            max_reruns,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn max_reruns(&self) -> u32 {
        self.max_reruns
    }

    /// Execute `pipeline` from the first step.
    ///
    /// A rerun directive is honored before the outcome is looked at, so a
    /// failing step may still rewind. The counter is global to the run.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        ctx: &mut WorkflowContext,
    ) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();
        let mut cursor = 0;

        info!(run_id = %ctx.run_id(), steps = pipeline.len(), "Starting pipeline");

        while cursor < pipeline.len() {
            let step = pipeline.steps[cursor].as_ref();
            let name = step.name();
            let result = self.invoke(step, ctx).await?;
            summary.invocations.push(name.to_string());

            if let Some(target) = result.rerun_from() {
                let target_index =
                    pipeline
                        .index_of(target)
                        .ok_or_else(|| PipelineError::UnknownRerunTarget {
                            step: name.to_string(),
                            target: target.to_string(),
                        })?;
                if target_index > cursor {
                    return Err(PipelineError::ForwardRerunTarget {
                        step: name.to_string(),
                        target: target.to_string(),
                    });
                }

                summary.reruns += 1;
                if summary.reruns > self.max_reruns {
                    error!(run_id = %ctx.run_id(), step = name, limit = self.max_reruns, "Rerun limit exceeded");
                    return Err(PipelineError::RerunLimitExceeded {
                        step: name.to_string(),
                        limit: self.max_reruns,
                    });
                }

                info!(
                    run_id = %ctx.run_id(),
                    step = name,
                    rerun_to = target,
                    rerun = summary.reruns,
                    "Rewinding pipeline"
                );
                if let Some(observer) = &self.observer {
                    observer
                        .rerun_requested(ctx.run_id(), name, target, summary.reruns)
                        .await;
                }
                cursor = target_index;
                continue;
            }

            if let Some(err) = result.error() {
                if step.is_critical() {
                    error!(run_id = %ctx.run_id(), step = name, error = err, "Critical step failed");
                    return Err(PipelineError::CriticalStepFailed {
                        step: name.to_string(),
                        error: err.to_string(),
                    });
                }
                warn!(run_id = %ctx.run_id(), step = name, error = err, "Best-effort step failed; continuing");
                summary.best_effort_failures.push(StepFailure {
                    step: name.to_string(),
                    error: err.to_string(),
                });
            }
            cursor += 1;
        }

        info!(
            run_id = %ctx.run_id(),
            invocations = summary.invocations.len(),
            reruns = summary.reruns,
            "Pipeline finished"
        );
        Ok(summary)
    }

    /// Invoke one named step in isolation. Its inputs come from the
    /// context's lazy-load path; a rerun directive is reported, not followed.
    pub async fn run_single_step(
        &self,
        pipeline: &Pipeline,
        name: &str,
        ctx: &mut WorkflowContext,
    ) -> Result<StepResult, PipelineError> {
        let step = pipeline.get(name).ok_or_else(|| PipelineError::UnknownStep {
            name: name.to_string(),
            known: pipeline.names().iter().map(|n| n.to_string()).collect(),
        })?;
        let result = self.invoke(step, ctx).await?;
        if let Some(target) = result.rerun_from() {
            info!(step = name, rerun_to = target, "Step requested a rerun; not followed in isolation");
        }
        Ok(result)
    }

    async fn invoke(
        &self,
        step: &dyn Step,
        ctx: &mut WorkflowContext,
    ) -> Result<StepResult, PipelineError> {
        let name = step.name();
        if let Some(observer) = &self.observer {
            observer.step_started(ctx.run_id(), name).await;
        }
        debug!(run_id = %ctx.run_id(), step = name, "Running step");
        let started = Instant::now();

        let result = match AssertUnwindSafe(step.run(ctx)).catch_unwind().await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) if is_store_outage(&err) => {
                if let Some(observer) = &self.observer {
                    let failed = StepResult::fail(format!("{:#}", err));
                    observer.step_finished(ctx.run_id(), name, &failed).await;
                }
                return Err(PipelineError::StoreUnavailable {
                    step: name.to_string(),
                    source: err,
                });
            }
            Ok(Err(err)) => StepResult::fail(format!("{:#}", err)),
            Err(panic) => StepResult::fail(format!("Step panicked: {}", panic_message(&*panic))),
        };

        debug!(
            run_id = %ctx.run_id(),
            step = name,
            success = result.is_success(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Step returned"
        );
        if let Some(observer) = &self.observer {
            observer.step_finished(ctx.run_id(), name, &result).await;
        }
        Ok(result)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
