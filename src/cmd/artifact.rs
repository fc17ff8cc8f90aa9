//! Artifact inspection: `shipwright artifact`.

use anyhow::{Context, Result, bail};
use shipwright::config::ShipwrightConfig;
use shipwright::errors::ArtifactError;
use shipwright::worker::open_artifact_store;
use shipwright_common::ArtifactType;

use crate::ArtifactCommands;

fn parse_type(raw: &str) -> Result<ArtifactType> {
    raw.parse::<ArtifactType>().map_err(|e| {
        let valid: Vec<&str> = ArtifactType::ALL.iter().map(|t| t.as_str()).collect();
        anyhow::anyhow!("{}. Valid types: {}", e, valid.join(", "))
    })
}

pub async fn cmd_artifact(config: ShipwrightConfig, command: ArtifactCommands) -> Result<()> {
    if let ArtifactCommands::Types = command {
        for t in ArtifactType::ALL {
            println!("{}", t);
        }
        return Ok(());
    }

    let store = open_artifact_store(&config)?;
    match command {
        ArtifactCommands::Types => {}
        ArtifactCommands::List { run_id } => {
            let types = store.list(&run_id).await?;
            if types.is_empty() {
                println!("No artifacts for run {}", run_id);
            }
            for t in types {
                println!("{}", t);
            }
        }
        ArtifactCommands::Show {
            run_id,
            artifact_type,
        } => {
            let artifact_type = parse_type(&artifact_type)?;
            let stored = match store.read(&run_id, artifact_type).await {
                Ok(stored) => stored,
                Err(ArtifactError::NotFound { .. }) => {
                    bail!("No {} artifact for run {}", artifact_type, run_id)
                }
                Err(e) => return Err(e.into()),
            };
            stored.verify()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&stored).context("Failed to render artifact")?
            );
        }
        ArtifactCommands::Delete {
            run_id,
            artifact_type,
        } => {
            let artifact_type = parse_type(&artifact_type)?;
            if store.delete(&run_id, artifact_type).await? {
                println!("Deleted {} artifact for run {}", artifact_type, run_id);
            } else {
                println!("No {} artifact for run {}", artifact_type, run_id);
            }
        }
        ArtifactCommands::Runs => {
            let runs = store.list_runs().await?;
            if runs.is_empty() {
                println!("No runs with artifacts");
            }
            for run in runs {
                println!("{}", run);
            }
        }
    }
    Ok(())
}
