//! Subprocess helper with a hard timeout.
//!
//! Used for git, gh, glab and quality-check commands. A timed-out child is
//! killed (it is spawned with `kill_on_drop`) and reported as
//! [`ToolOutcome::TimedOut`] so callers can turn it into an ordinary step
//! failure.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Finished(ToolOutput),
    TimedOut,
}

/// Run `program args...` in `cwd`, waiting at most `limit`.
///
/// Spawn failures are errors. Non-zero exits are not; inspect
/// [`ToolOutput::code`].
pub async fn run_tool(
    program: &str,
    args: &[&str],
    cwd: &Path,
    limit: Duration,
) -> Result<ToolOutcome> {
    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", program))?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.with_context(|| format!("Failed to wait for {}", program))?,
        Err(_) => {
            tracing::warn!(program, timeout_secs = limit.as_secs(), "tool timed out");
            return Ok(ToolOutcome::TimedOut);
        }
    };

    Ok(ToolOutcome::Finished(ToolOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }))
}

/// Run a shell command line through `sh -c`.
pub async fn run_shell(command: &str, cwd: &Path, limit: Duration) -> Result<ToolOutcome> {
    run_tool("sh", &["-c", command], cwd, limit).await
}

/// Run a tool that must succeed, returning its trimmed stdout.
pub async fn run_checked(
    program: &str,
    args: &[&str],
    cwd: &Path,
    limit: Duration,
) -> Result<String> {
    match run_tool(program, args, cwd, limit).await? {
        ToolOutcome::Finished(out) if out.success() => Ok(out.stdout.trim().to_string()),
        ToolOutcome::Finished(out) => anyhow::bail!(
            "{} {} exited with code {}: {}",
            program,
            args.join(" "),
            out.code,
            crate::util::tail(&out.stderr, 500)
        ),
        ToolOutcome::TimedOut => anyhow::bail!(
            "{} {} timed out after {}s",
            program,
            args.join(" "),
            limit.as_secs()
        ),
    }
}
