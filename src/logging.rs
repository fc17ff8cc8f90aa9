//! Tracing subscriber setup.
//!
//! Console output goes to stderr so command output on stdout stays clean.
//! When a log directory is configured, a daily-rolling JSON file is written
//! alongside it.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the `verbose` default. The returned
/// guard must be held for the lifetime of the process so buffered file
/// output is flushed on exit.
pub fn init(verbose: bool, json_console: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if verbose { "shipwright=debug,info" } else { "shipwright=info,warn" };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = if json_console {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(console_filter)
            .boxed()
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "shipwright.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new("shipwright=debug,info"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
