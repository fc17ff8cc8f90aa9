//! In-process workflow execution: `shipwright run`.

use std::sync::Arc;

use anyhow::{Result, bail};
use shipwright::config::ShipwrightConfig;
use shipwright::util::{is_valid_run_id, new_run_id};
use shipwright::worker::Worker;
use shipwright_common::JobType;

use super::App;

/// Run a workflow for `job_id` without claiming it. The run is recorded and
/// linked to the job; the job's status is left alone.
pub async fn cmd_run(
    config: ShipwrightConfig,
    job_id: i64,
    workflow: Option<String>,
    run_id: Option<String>,
    parent_run: Option<String>,
) -> Result<()> {
    let run_id = run_id.unwrap_or_else(new_run_id);
    if !is_valid_run_id(&run_id) {
        bail!("Invalid run id '{}'", run_id);
    }

    let app = App::open(config)?;
    let job = app.jobs.call(move |db| db.require_job(job_id)).await?;
    let workflow = workflow.unwrap_or_else(|| job.job_type.workflow_type().to_string());
    let parent_run = match parent_run {
        Some(parent) => Some(parent),
        None if job.job_type == JobType::Patch => job.run_id.clone(),
        None => None,
    };

    let registry = Arc::new(app.registry()?);
    if !registry.contains(&workflow) {
        // Surfaces the registry's message naming the known types.
        registry.resolve(&workflow)?;
    }

    {
        let (run, wf, parent) = (run_id.clone(), workflow.clone(), parent_run.clone());
        app.jobs
            .call(move |db| {
                db.create_run(&run, job_id, &wf, parent.as_deref())?;
                db.set_job_run(job_id, &run)
            })
            .await?;
    }

    println!("Running workflow '{}' for job #{} (run {})", workflow, job_id, run_id);
    let worker = Worker::new(
        "local",
        app.jobs.clone(),
        app.artifacts()?,
        registry,
        app.config.clone(),
    );
    let result = worker.execute(job, &workflow, &run_id, parent_run).await;

    let error = result.as_ref().err().map(|e| e.to_string());
    {
        let (run, err) = (run_id.clone(), error.clone());
        app.jobs
            .call(move |db| db.finish_run(&run, err.is_none(), err.as_deref()))
            .await?;
    }

    match result {
        Ok(summary) => {
            println!(
                "Run {} succeeded: {} step invocation(s), {} rerun(s)",
                run_id,
                summary.invocations.len(),
                summary.reruns
            );
            for failure in &summary.best_effort_failures {
                println!("  best-effort step '{}' failed: {}", failure.step, failure.error);
            }
            Ok(())
        }
        Err(e) => bail!("Run {} failed: {}", run_id, e),
    }
}
