use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use shipwright::config::ShipwrightConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(version, about = "Pipeline engine that turns backlog jobs into pull requests")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Config file to use instead of .shipwright/shipwright.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .shipwright/ with a default config and an empty database
    Init {
        /// Overwrite an existing shipwright.toml
        #[arg(long)]
        force: bool,
    },
    /// Claim and process jobs until interrupted
    Worker {
        /// Identifier stamped on claimed jobs (overrides [worker] id)
        #[arg(long)]
        worker_id: Option<String>,

        /// Seconds to sleep when the queue is empty
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Process at most one job, then exit
        #[arg(long)]
        once: bool,
    },
    /// Run a workflow for a job in-process, without claiming it
    Run {
        job_id: i64,

        /// Workflow type (defaults to the one matching the job type)
        #[arg(long)]
        workflow: Option<String>,

        /// Reuse an existing run id instead of generating one
        #[arg(long)]
        run_id: Option<String>,

        /// Run whose artifacts a patch workflow builds on
        #[arg(long)]
        parent_run: Option<String>,
    },
    /// Inspect the step catalog or run a single step
    Step {
        #[command(subcommand)]
        command: StepCommands,
    },
    /// Inspect stored artifacts
    Artifact {
        #[command(subcommand)]
        command: ArtifactCommands,
    },
    /// Manage the job backlog
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Registered workflow types
    Workflow {
        #[command(subcommand)]
        command: WorkflowCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum StepCommands {
    /// List every known step
    List,
    /// Show the steps that must run before NAME, in order
    Deps { name: String },
    /// Check the catalog and configuration for problems
    Validate,
    /// Run one step against an existing run's artifacts
    Run {
        name: String,

        #[arg(long)]
        job_id: i64,

        /// Run whose artifacts the step reads (required when it has dependencies)
        #[arg(long)]
        run_id: Option<String>,

        #[arg(long)]
        parent_run: Option<String>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ArtifactCommands {
    /// List artifact types
    Types,
    /// List the artifacts stored for a run
    List { run_id: String },
    /// Print one artifact as JSON
    Show { run_id: String, artifact_type: String },
    /// Delete one artifact
    Delete { run_id: String, artifact_type: String },
    /// List run ids that hold artifacts
    Runs,
}

#[derive(Subcommand, Clone)]
pub enum JobCommands {
    /// Add a job to the backlog
    Create {
        description: String,

        /// Queue as a patch job
        #[arg(long)]
        patch: bool,

        /// Reserve the job for one worker
        #[arg(long)]
        assign: Option<String>,
    },
    /// List jobs
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one job and its runs
    Show { id: i64 },
    /// Queue a follow-up change on a finished job
    RequeuePatch {
        id: i64,

        /// Replace the job description
        #[arg(long)]
        description: Option<String>,
    },
    /// Put a failed job back in its queue
    Retry { id: i64 },
    /// Return started jobs with no heartbeat to their queue
    Reclaim {
        #[arg(long)]
        older_than: u64,
    },
}

#[derive(Subcommand, Clone)]
pub enum WorkflowCommands {
    /// List workflow types
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    if let Commands::Init { force } = &cli.command {
        return cmd::cmd_init(&project_dir, cli.config.as_deref(), *force);
    }

    let mut config = ShipwrightConfig::load(project_dir, cli.config.as_deref())?;
    config.verbose = cli.verbose;
    let _log_guard = shipwright::logging::init(
        cli.verbose,
        config.toml.logging.json,
        config.log_dir().as_deref(),
    )?;

    match &cli.command {
        // Runs before the config is loaded.
        Commands::Init { .. } => {}
        Commands::Worker {
            worker_id,
            poll_interval,
            once,
        } => cmd::cmd_worker(config, worker_id.clone(), *poll_interval, *once).await?,
        Commands::Run {
            job_id,
            workflow,
            run_id,
            parent_run,
        } => {
            cmd::cmd_run(
                config,
                *job_id,
                workflow.clone(),
                run_id.clone(),
                parent_run.clone(),
            )
            .await?
        }
        Commands::Step { command } => cmd::cmd_step(config, command.clone()).await?,
        Commands::Artifact { command } => cmd::cmd_artifact(config, command.clone()).await?,
        Commands::Job { command } => cmd::cmd_job(config, command.clone()).await?,
        Commands::Workflow { command } => cmd::cmd_workflow(config, command.clone())?,
    }

    Ok(())
}
