//! Step catalog inspection and single-step runs: `shipwright step`.

use std::sync::Arc;

use anyhow::{Result, bail};
use shipwright::config::ShipwrightConfig;
use shipwright::util::{is_valid_run_id, new_run_id};
use shipwright::workflow::{Dep, PipelineRunner, StepCatalog, StepLedger, WorkflowContext};

use super::App;
use crate::StepCommands;

pub async fn cmd_step(config: ShipwrightConfig, command: StepCommands) -> Result<()> {
    let catalog = StepCatalog::builtin();
    match command {
        StepCommands::List => {
            println!("{:<16} {:<9} {:<40} PRODUCES", "STEP", "CRITICAL", "DEPENDS ON");
            for spec in catalog.list() {
                let deps: Vec<String> = spec.dependencies.iter().map(|d| d.to_string()).collect();
                let outputs: Vec<&str> = spec.outputs.iter().map(|o| o.as_str()).collect();
                println!(
                    "{:<16} {:<9} {:<40} {}",
                    spec.name,
                    if spec.critical { "yes" } else { "no" },
                    if deps.is_empty() { "-".to_string() } else { deps.join(", ") },
                    if outputs.is_empty() { "-".to_string() } else { outputs.join(", ") },
                );
            }
        }
        StepCommands::Deps { name } => {
            let order = catalog.resolve_dependencies(&name)?;
            for (i, step) in order.iter().enumerate() {
                println!("{}. {}", i + 1, step);
            }
        }
        StepCommands::Validate => {
            let mut problems = catalog.validate();
            problems.extend(config.validate().into_iter().map(|p| format!("config: {}", p)));
            if problems.is_empty() {
                println!("Step catalog and configuration are valid");
            } else {
                for problem in &problems {
                    println!("  - {}", problem);
                }
                bail!("{} problem(s) found", problems.len());
            }
        }
        StepCommands::Run {
            name,
            job_id,
            run_id,
            parent_run,
        } => run_step(config, &catalog, name, job_id, run_id, parent_run).await?,
    }
    Ok(())
}

async fn run_step(
    config: ShipwrightConfig,
    catalog: &StepCatalog,
    name: String,
    job_id: i64,
    run_id: Option<String>,
    parent_run: Option<String>,
) -> Result<()> {
    let Some(spec) = catalog.get(&name) else {
        let known: Vec<&str> = catalog.list().iter().map(|s| s.name).collect();
        bail!("Unknown step '{}'. Available: {}", name, known.join(", "));
    };
    let run_id = match run_id {
        Some(id) => id,
        None if spec
            .dependencies
            .iter()
            .all(|d| matches!(d, Dep::Optional(_))) =>
        {
            new_run_id()
        }
        None => bail!(
            "Step '{}' reads artifacts from earlier steps; pass --run-id of a run that has them",
            name
        ),
    };
    if !is_valid_run_id(&run_id) {
        bail!("Invalid run id '{}'", run_id);
    }

    let app = App::open(config)?;
    let registry = app.registry()?;
    // The first workflow that contains the step supplies it.
    let mut found = None;
    for workflow in registry.list_types() {
        let pipeline = registry.resolve(&workflow)?;
        if pipeline.index_of(&name).is_some() {
            found = Some((workflow, pipeline));
            break;
        }
    }
    let Some((workflow, pipeline)) = found else {
        bail!(
            "Step '{}' is not part of any configured workflow (create_pr needs [pipeline] platform)",
            name
        );
    };

    let job = app.jobs.call(move |db| db.require_job(job_id)).await?;
    {
        let (run, wf) = (run_id.clone(), workflow.clone());
        app.jobs
            .call(move |db| {
                if db.get_run(&run)?.is_none() {
                    db.create_run(&run, job_id, &wf, None)?;
                }
                Ok(())
            })
            .await?;
    }

    let mut ctx = WorkflowContext::new(run_id.as_str(), job_id)
        .with_artifacts(app.artifacts()?)
        .with_parent_run(parent_run)
        .with_job(job);
    let runner = PipelineRunner::new(app.config.toml.pipeline.max_reruns)
        .with_observer(Arc::new(StepLedger::new(app.jobs.clone())));
    let result = runner.run_single_step(&pipeline, &name, &mut ctx).await?;

    if let Some(target) = result.rerun_from() {
        println!("Step requested a rerun from '{}' (not followed)", target);
    }
    if !result.metadata().is_empty() {
        println!("{}", serde_json::to_string_pretty(result.metadata())?);
    }
    match result.error() {
        None => {
            println!("Step '{}' succeeded (run {})", name, run_id);
            Ok(())
        }
        Some(error) => bail!("Step '{}' failed (run {}): {}", name, run_id, error),
    }
}
