//! The worker daemon: `shipwright worker`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use shipwright::config::ShipwrightConfig;
use shipwright::worker::{Worker, shutdown_on_signal};
use tracing::warn;

use super::App;

pub async fn cmd_worker(
    config: ShipwrightConfig,
    worker_id: Option<String>,
    poll_interval: Option<u64>,
    once: bool,
) -> Result<()> {
    let Some(worker_id) = worker_id.or_else(|| config.worker_id().map(str::to_string)) else {
        bail!("No worker id: pass --worker-id, set [worker] id or SHIPWRIGHT_WORKER_ID");
    };
    for problem in config.validate() {
        warn!("Config: {}", problem);
    }

    let app = App::open(config)?;
    let registry = Arc::new(app.registry()?);
    let mut worker = Worker::new(
        worker_id,
        app.jobs.clone(),
        app.artifacts()?,
        registry,
        app.config.clone(),
    );
    if let Some(secs) = poll_interval {
        worker = worker.with_poll_interval(Duration::from_secs(secs));
    }

    let processed = worker.run(once, shutdown_on_signal()).await?;
    println!("Processed {} job(s)", processed);
    Ok(())
}
