//! Invoking an external coding agent.
//!
//! Steps talk to the agent only through [`AgentRunner`], so tests can swap
//! in a scripted double and the CLI adapter stays in one place.

pub mod cli;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::AgentError;

pub use cli::CliAgent;

#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Short label for logs and transcripts, usually the step name.
    pub agent_name: String,
    pub prompt: String,
    pub run_id: String,
    pub cwd: PathBuf,
    /// Overrides the configured model for this call.
    pub model: Option<String>,
}

impl AgentRequest {
    pub fn new(
        agent_name: impl Into<String>,
        run_id: impl Into<String>,
        cwd: impl Into<PathBuf>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            prompt: prompt.into(),
            run_id: run_id.into(),
            cwd: cwd.into(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    pub output: String,
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError>;
}
