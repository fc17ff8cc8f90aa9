use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{AgentRequest, AgentResponse, AgentRunner};
use crate::config::{AgentProvider, ShipwrightConfig};
use crate::errors::AgentError;
use crate::util::tail;

/// Runs the configured agent CLI as a child process.
///
/// `claude` receives the prompt on stdin; `opencode` takes it as the last
/// argument. The child is killed if the call times out.
#[derive(Debug, Clone)]
pub struct CliAgent {
    provider: AgentProvider,
    command: String,
    model: Option<String>,
    timeout: Duration,
    skip_permissions: bool,
    log_dir: Option<PathBuf>,
}

impl CliAgent {
    pub fn new(provider: AgentProvider, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            provider,
            command: command.into(),
            model: None,
            timeout,
            skip_permissions: false,
            log_dir: None,
        }
    }

    pub fn from_config(config: &ShipwrightConfig) -> Self {
        let agent = &config.toml.agent;
        Self {
            provider: agent.provider,
            command: config.agent_command(),
            model: agent.model.clone(),
            timeout: Duration::from_secs(agent.timeout_secs),
            skip_permissions: agent.skip_permissions,
            log_dir: config.agent_log_dir(),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_skip_permissions(mut self, skip: bool) -> Self {
        self.skip_permissions = skip;
        self
    }

    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    /// Command-line arguments for `request`.
    pub fn args(&self, request: &AgentRequest) -> Vec<String> {
        let model = request.model.as_ref().or(self.model.as_ref());
        match self.provider {
            AgentProvider::Claude => {
                let mut args = vec![
                    "--print".to_string(),
                    "--output-format".to_string(),
                    "text".to_string(),
                ];
                if let Some(model) = model {
                    args.push("--model".to_string());
                    args.push(model.clone());
                }
                if self.skip_permissions {
                    args.push("--dangerously-skip-permissions".to_string());
                }
                args
            }
            AgentProvider::Opencode => {
                let mut args = vec!["run".to_string()];
                if let Some(model) = model {
                    args.push("--model".to_string());
                    args.push(model.clone());
                }
                args.push(request.prompt.clone());
                args
            }
        }
    }

    fn prompt_on_stdin(&self) -> bool {
        matches!(self.provider, AgentProvider::Claude)
    }

    async fn execute(&self, request: &AgentRequest) -> Result<std::process::Output, AgentError> {
        let mut child = Command::new(&self.command)
            .args(self.args(request))
            .current_dir(&request.cwd)
            .stdin(if self.prompt_on_stdin() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::Spawn {
                program: self.command.clone(),
                source,
            })?;

        if self.prompt_on_stdin()
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| AgentError::Other(anyhow::Error::new(e).context("Failed to write prompt")))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| AgentError::Other(anyhow::Error::new(e).context("Failed to close stdin")))?;
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| AgentError::Other(anyhow::Error::new(e).context("Failed to wait for agent")))
    }

    fn write_transcript(&self, request: &AgentRequest, output: &str) {
        let Some(dir) = &self.log_dir else {
            return;
        };
        let path = transcript_path(dir, request);
        let body = format!(
            "=== PROMPT ===\n{}\n\n=== OUTPUT ===\n{}\n",
            request.prompt, output
        );
        let result = path
            .parent()
            .map(std::fs::create_dir_all)
            .transpose()
            .and_then(|_| std::fs::write(&path, body));
        if let Err(e) = result {
            warn!(path = %path.display(), "Failed to write agent transcript: {}", e);
        }
    }
}

fn transcript_path(dir: &Path, request: &AgentRequest) -> PathBuf {
    dir.join(&request.run_id)
        .join(format!("{}.log", request.agent_name))
}

#[async_trait]
impl AgentRunner for CliAgent {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        info!(
            agent = %request.agent_name,
            run_id = %request.run_id,
            command = %self.command,
            prompt_chars = request.prompt.len(),
            "Invoking agent"
        );
        let start = Instant::now();

        let output = match tokio::time::timeout(self.timeout, self.execute(request)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(agent = %request.agent_name, timeout_secs = self.timeout.as_secs(), "Agent timed out");
                return Err(AgentError::TimedOut {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        self.write_transcript(request, &stdout);
        debug!(
            agent = %request.agent_name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            output_chars = stdout.len(),
            "Agent finished"
        );

        if !output.status.success() {
            return Err(AgentError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: tail(&stderr, 2000),
            });
        }
        if stdout.trim().is_empty() {
            return Err(AgentError::InvalidOutput("agent produced no output".into()));
        }
        Ok(AgentResponse { output: stdout })
    }
}
