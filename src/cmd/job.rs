//! Backlog management: `shipwright job`.

use std::time::Duration;

use anyhow::{Result, anyhow};
use shipwright::config::ShipwrightConfig;
use shipwright_common::{Job, JobStatus, JobType};

use super::App;
use crate::JobCommands;

fn print_job_row(job: &Job) {
    println!(
        "#{:<5} {:<14} {:<6} {:<12} {}",
        job.id,
        job.status.as_str(),
        job.job_type.as_str(),
        job.assigned_to.as_deref().unwrap_or("-"),
        job.title()
    );
}

pub async fn cmd_job(config: ShipwrightConfig, command: JobCommands) -> Result<()> {
    let app = App::open(config)?;
    match command {
        JobCommands::Create {
            description,
            patch,
            assign,
        } => {
            let job_type = if patch { JobType::Patch } else { JobType::Main };
            let job = app
                .jobs
                .call(move |db| db.create_job(&description, job_type, assign.as_deref()))
                .await?;
            println!("Created job #{} ({}, {})", job.id, job.job_type, job.status);
        }
        JobCommands::List { status } => {
            let status = status
                .map(|s| s.parse::<JobStatus>().map_err(|e| anyhow!(e)))
                .transpose()?;
            let jobs = app.jobs.call(move |db| db.list_jobs(status)).await?;
            if jobs.is_empty() {
                println!("No jobs");
                return Ok(());
            }
            println!("{:<6} {:<14} {:<6} {:<12} TITLE", "ID", "STATUS", "TYPE", "WORKER");
            for job in &jobs {
                print_job_row(job);
            }
        }
        JobCommands::Show { id } => {
            let (job, runs) = app
                .jobs
                .call(move |db| Ok((db.require_job(id)?, db.list_runs(Some(id))?)))
                .await?;
            println!("Job #{}", job.id);
            println!("  status:   {}", job.status);
            println!("  type:     {}", job.job_type);
            println!("  worker:   {}", job.assigned_to.as_deref().unwrap_or("-"));
            println!("  run:      {}", job.run_id.as_deref().unwrap_or("-"));
            println!("  created:  {}", job.created_at);
            println!("  updated:  {}", job.updated_at);
            println!();
            println!("{}", job.description);
            if !runs.is_empty() {
                println!();
                println!("Runs:");
                for run in runs {
                    println!(
                        "  {} {:<10} {:<10} {}{}",
                        run.run_id,
                        run.workflow_type,
                        run.status.as_str(),
                        run.started_at,
                        run.error.map(|e| format!("  error: {}", e)).unwrap_or_default()
                    );
                }
            }
        }
        JobCommands::RequeuePatch { id, description } => {
            let job = app
                .jobs
                .call(move |db| db.requeue_as_patch(id, description.as_deref()))
                .await?;
            println!("Job #{} queued as a patch ({})", job.id, job.status);
        }
        JobCommands::Retry { id } => {
            let job = app.jobs.call(move |db| db.retry_job(id)).await?;
            println!("Job #{} back in the queue ({})", job.id, job.status);
        }
        JobCommands::Reclaim { older_than } => {
            let jobs = app
                .jobs
                .call(move |db| db.reclaim_stale_jobs(Duration::from_secs(older_than)))
                .await?;
            if jobs.is_empty() {
                println!("No stale jobs");
            }
            for job in &jobs {
                println!("Reclaimed job #{} ({})", job.id, job.status);
            }
        }
    }
    Ok(())
}
