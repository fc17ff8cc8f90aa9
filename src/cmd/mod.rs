//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled         |
//! |------------|--------------------------|
//! | `init`     | `Init`                   |
//! | `worker`   | `Worker`                 |
//! | `run`      | `Run`                    |
//! | `step`     | `Step` subcommands       |
//! | `artifact` | `Artifact` subcommands   |
//! | `job`      | `Job` subcommands        |
//! | `workflow` | `Workflow` subcommands   |

pub mod artifact;
pub mod init;
pub mod job;
pub mod run;
pub mod step;
pub mod worker;
pub mod workflow;

pub use artifact::cmd_artifact;
pub use init::cmd_init;
pub use job::cmd_job;
pub use run::cmd_run;
pub use step::cmd_step;
pub use worker::cmd_worker;
pub use workflow::cmd_workflow;

use std::sync::Arc;

use anyhow::Result;
use shipwright::agent::CliAgent;
use shipwright::artifacts::ArtifactStore;
use shipwright::config::ShipwrightConfig;
use shipwright::jobs::DbHandle;
use shipwright::steps::{StepServices, builtin_registry};
use shipwright::worker::{open_artifact_store, open_job_db};
use shipwright::workflow::WorkflowRegistry;

/// Stores and services shared by the commands that touch the database.
pub struct App {
    pub config: Arc<ShipwrightConfig>,
    pub jobs: DbHandle,
}

impl App {
    pub fn open(config: ShipwrightConfig) -> Result<Self> {
        let jobs = open_job_db(&config)?;
        Ok(Self {
            config: Arc::new(config),
            jobs,
        })
    }

    pub fn artifacts(&self) -> Result<Arc<dyn ArtifactStore>> {
        open_artifact_store(&self.config)
    }

    pub fn services(&self) -> StepServices {
        let agent = CliAgent::from_config(&self.config);
        StepServices::new(self.jobs.clone(), Arc::new(agent), self.config.clone())
    }

    pub fn registry(&self) -> Result<WorkflowRegistry> {
        Ok(builtin_registry(self.services())?)
    }
}
