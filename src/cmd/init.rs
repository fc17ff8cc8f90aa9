//! Project initialization: `shipwright init`.

use std::path::Path;

use anyhow::{Context, Result};
use shipwright::config::{CONFIG_DIR, CONFIG_FILE, ShipwrightConfig, ShipwrightToml};
use shipwright::jobs::JobDb;

pub fn cmd_init(project_dir: &Path, config_file: Option<&Path>, force: bool) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;

    let config_path = match config_file {
        Some(path) => path.to_path_buf(),
        None => config_dir.join(CONFIG_FILE),
    };
    let wrote_config = if config_path.exists() && !force {
        false
    } else {
        ShipwrightToml::default().save(&config_path)?;
        true
    };

    let config = ShipwrightConfig::load(project_dir.to_path_buf(), Some(&config_path))?;
    let db_path = config.db_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    JobDb::open(&db_path, config.busy_timeout())?;

    println!("Initialized shipwright project at {}", config_dir.display());
    if wrote_config {
        println!("  config:   {}", config_path.display());
    } else {
        println!(
            "  config:   {} (kept existing; use --force to overwrite)",
            config_path.display()
        );
    }
    println!("  database: {}", db_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set [worker] id and [pipeline] platform in the config");
    println!("  2. Queue work with `shipwright job create \"<description>\"`");
    println!("  3. Start a worker with `shipwright worker`");
    Ok(())
}
