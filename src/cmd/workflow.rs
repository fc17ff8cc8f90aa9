//! Workflow registry listing: `shipwright workflow`.

use anyhow::Result;
use shipwright::config::ShipwrightConfig;

use super::App;
use crate::WorkflowCommands;

pub fn cmd_workflow(config: ShipwrightConfig, command: WorkflowCommands) -> Result<()> {
    let app = App::open(config)?;
    let registry = app.registry()?;
    match command {
        WorkflowCommands::List => {
            for workflow in registry.list_types() {
                let pipeline = registry.resolve(&workflow)?;
                println!(
                    "{:<12} {}",
                    workflow,
                    registry.description(&workflow).unwrap_or_default()
                );
                println!("{:<12} {}", "", pipeline.names().join(" -> "));
            }
        }
    }
    Ok(())
}
