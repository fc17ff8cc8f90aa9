//! Layered configuration for Shipwright.
//!
//! Settings are read from `.shipwright/shipwright.toml` (falling back to the
//! user-level `shipwright/shipwright.toml` under the platform config dir),
//! then overridden by `SHIPWRIGHT_*` environment variables, then by CLI
//! flags. A `.env` file in the project directory is loaded before the
//! environment is consulted.
//!
//! # Configuration File Format
//!
//! ```toml
//! [database]
//! path = ".shipwright/shipwright.db"
//! busy_timeout_ms = 5000
//!
//! [worker]
//! id = "worker-a"
//! poll_interval_secs = 10
//! workflow_timeout_secs = 3600
//! heartbeat_secs = 30
//! reclaim_after_secs = 7200
//!
//! [pipeline]
//! max_reruns = 5
//! max_review_iterations = 5
//! platform = "github"
//! base_branch = "main"
//!
//! [agent]
//! provider = "claude"
//! model = "sonnet"
//! timeout_secs = 1800
//!
//! [artifacts]
//! backend = "sqlite"
//!
//! [quality]
//! commands = ["cargo fmt --check", "cargo clippy -- -D warnings"]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_DIR: &str = ".shipwright";
pub const CONFIG_FILE: &str = "shipwright.toml";

// ── Enumerated settings ───────────────────────────────────────────────

/// Code-hosting platform used for pull requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Github,
    Gitlab,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Gitlab => "gitlab",
        }
    }

    /// CLI tool that talks to this platform.
    pub fn cli(&self) -> &'static str {
        match self {
            Self::Github => "gh",
            Self::Gitlab => "glab",
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "github" => Ok(Self::Github),
            "gitlab" => Ok(Self::Gitlab),
            _ => anyhow::bail!("Invalid platform '{}'. Valid values: github, gitlab", s),
        }
    }
}

/// Coding-agent CLI to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentProvider {
    #[default]
    Claude,
    Opencode,
}

impl AgentProvider {
    pub fn default_command(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Opencode => "opencode",
        }
    }
}

impl std::str::FromStr for AgentProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "opencode" => Ok(Self::Opencode),
            _ => anyhow::bail!("Invalid agent provider '{}'. Valid values: claude, opencode", s),
        }
    }
}

/// Where artifacts are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactBackend {
    #[default]
    Sqlite,
    Files,
}

// ── File sections ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("shipwright.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Identifier stamped on claimed jobs
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_workflow_timeout_secs")]
    pub workflow_timeout_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Started jobs with no heartbeat for this long go back to the queue.
    /// Unset disables automatic reclaim.
    #[serde(default)]
    pub reclaim_after_secs: Option<u64>,
    #[serde(default = "default_claim_retry_attempts")]
    pub claim_retry_attempts: u32,
    #[serde(default = "default_claim_retry_base_ms")]
    pub claim_retry_base_ms: u64,
    #[serde(default = "default_claim_retry_max_ms")]
    pub claim_retry_max_ms: u64,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_workflow_timeout_secs() -> u64 {
    3600
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_claim_retry_attempts() -> u32 {
    5
}

fn default_claim_retry_base_ms() -> u64 {
    500
}

fn default_claim_retry_max_ms() -> u64 {
    30_000
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            id: None,
            poll_interval_secs: default_poll_interval_secs(),
            workflow_timeout_secs: default_workflow_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            reclaim_after_secs: None,
            claim_retry_attempts: default_claim_retry_attempts(),
            claim_retry_base_ms: default_claim_retry_base_ms(),
            claim_retry_max_ms: default_claim_retry_max_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_max_reruns")]
    pub max_reruns: u32,
    #[serde(default = "default_max_review_iterations")]
    pub max_review_iterations: u32,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Repository the agents work in. Defaults to the project directory.
    #[serde(default)]
    pub repo_path: Option<PathBuf>,
}

fn default_max_reruns() -> u32 {
    5
}

fn default_max_review_iterations() -> u32 {
    5
}

fn default_base_branch() -> String {
    "main".to_string()
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_reruns: default_max_reruns(),
            max_review_iterations: default_max_review_iterations(),
            platform: None,
            base_branch: default_base_branch(),
            repo_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default)]
    pub provider: AgentProvider,
    /// Override for the agent binary
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_skip_permissions")]
    pub skip_permissions: bool,
    /// Directory for raw agent transcripts
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_agent_timeout_secs() -> u64 {
    1800
}

fn default_skip_permissions() -> bool {
    true
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            provider: AgentProvider::default(),
            command: None,
            model: None,
            timeout_secs: default_agent_timeout_secs(),
            skip_permissions: default_skip_permissions(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsSection {
    #[serde(default)]
    pub backend: ArtifactBackend,
    #[serde(default = "default_artifacts_dir")]
    pub dir: PathBuf,
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("workflows")
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            backend: ArtifactBackend::default(),
            dir: default_artifacts_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySection {
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default = "default_quality_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_quality_timeout_secs() -> u64 {
    600
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            commands: Vec::new(),
            timeout_secs: default_quality_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsSection {
    /// Timeout for git / gh / glab invocations
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tool_timeout_secs() -> u64 {
    300
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Directory for the rolling JSON log. Unset logs to stderr only.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub json: bool,
}

/// Contents of `shipwright.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShipwrightToml {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub artifacts: ArtifactsSection,
    #[serde(default)]
    pub quality: QualitySection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl ShipwrightToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse shipwright.toml")
    }

    /// Load from `<project>/.shipwright/shipwright.toml`, then the user-level
    /// config, then built-in defaults.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let project_file = project_dir.join(CONFIG_DIR).join(CONFIG_FILE);
        if project_file.exists() {
            return Self::load(&project_file);
        }
        if let Some(user_file) = user_config_file()
            && user_file.exists()
        {
            return Self::load(&user_file);
        }
        Ok(Self::default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize shipwright.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `SHIPWRIGHT_*` overrides using `lookup` to read variables.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(id) = lookup("SHIPWRIGHT_WORKER_ID") {
            self.worker.id = Some(id);
        }
        if let Some(path) = lookup("SHIPWRIGHT_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(platform) = lookup("SHIPWRIGHT_PLATFORM") {
            self.pipeline.platform = if platform.trim().is_empty() {
                None
            } else {
                Some(platform.parse().context("SHIPWRIGHT_PLATFORM")?)
            };
        }
        if let Some(provider) = lookup("SHIPWRIGHT_AGENT_PROVIDER") {
            self.agent.provider = provider.parse().context("SHIPWRIGHT_AGENT_PROVIDER")?;
        }
        if let Some(cmd) = lookup("SHIPWRIGHT_AGENT_CMD") {
            self.agent.command = Some(cmd);
        }
        if let Some(model) = lookup("SHIPWRIGHT_AGENT_MODEL") {
            self.agent.model = Some(model);
        }
        if let Some(secs) = lookup("SHIPWRIGHT_WORKFLOW_TIMEOUT") {
            self.worker.workflow_timeout_secs = secs
                .parse()
                .with_context(|| format!("Invalid SHIPWRIGHT_WORKFLOW_TIMEOUT '{}'", secs))?;
        }
        Ok(())
    }

    /// Validate the configuration and return any problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.worker.poll_interval_secs == 0 {
            problems.push("worker.poll_interval_secs must be positive".to_string());
        }
        if self.worker.workflow_timeout_secs == 0 {
            problems.push("worker.workflow_timeout_secs must be positive".to_string());
        }
        if self.worker.heartbeat_secs == 0 {
            problems.push("worker.heartbeat_secs must be positive".to_string());
        }
        if let Some(id) = &self.worker.id
            && id.trim().is_empty()
        {
            problems.push("worker.id must not be blank".to_string());
        }
        if let Some(reclaim) = self.worker.reclaim_after_secs
            && reclaim <= self.worker.heartbeat_secs
        {
            problems.push(format!(
                "worker.reclaim_after_secs ({}) must exceed worker.heartbeat_secs ({})",
                reclaim, self.worker.heartbeat_secs
            ));
        }
        if self.pipeline.max_reruns == 0 {
            problems.push("pipeline.max_reruns must be at least 1".to_string());
        }
        if self.agent.timeout_secs == 0 {
            problems.push("agent.timeout_secs must be positive".to_string());
        }
        if self.tools.timeout_secs == 0 {
            problems.push("tools.timeout_secs must be positive".to_string());
        }

        problems
    }
}

fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("shipwright").join(CONFIG_FILE))
}

// ── Resolved configuration ───────────────────────────────────────────

/// Configuration resolved against a project directory.
///
/// Relative paths in the file are interpreted relative to `project_dir`.
#[derive(Debug, Clone)]
pub struct ShipwrightConfig {
    pub project_dir: PathBuf,
    pub toml: ShipwrightToml,
    pub verbose: bool,
}

impl ShipwrightConfig {
    /// Load `.env`, the config file and environment overrides.
    pub fn load(project_dir: PathBuf, config_file: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::from_path(project_dir.join(".env"));

        let mut toml = match config_file {
            Some(path) => ShipwrightToml::load(path)?,
            None => ShipwrightToml::load_or_default(&project_dir)?,
        };
        toml.apply_env(|key| std::env::var(key).ok())?;

        Ok(Self {
            project_dir,
            toml,
            verbose: false,
        })
    }

    pub fn from_toml(project_dir: PathBuf, toml: ShipwrightToml) -> Self {
        Self {
            project_dir,
            toml,
            verbose: false,
        }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.project_dir.join(CONFIG_DIR)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir().join(CONFIG_FILE)
    }

    pub fn db_path(&self) -> PathBuf {
        self.resolve(&self.toml.database.path)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.toml.database.busy_timeout_ms)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.resolve(&self.toml.artifacts.dir)
    }

    pub fn repo_path(&self) -> PathBuf {
        match &self.toml.pipeline.repo_path {
            Some(path) => self.resolve(path),
            None => self.project_dir.clone(),
        }
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.dir.as_ref().map(|d| self.resolve(d))
    }

    pub fn agent_log_dir(&self) -> Option<PathBuf> {
        self.toml.agent.log_dir.as_ref().map(|d| self.resolve(d))
    }

    /// Agent binary (file/env override, then the provider default).
    pub fn agent_command(&self) -> String {
        self.toml
            .agent
            .command
            .clone()
            .unwrap_or_else(|| self.toml.agent.provider.default_command().to_string())
    }

    pub fn worker_id(&self) -> Option<&str> {
        self.toml.worker.id.as_deref()
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let toml = ShipwrightToml::default();
        assert_eq!(toml.worker.poll_interval_secs, 10);
        assert_eq!(toml.worker.workflow_timeout_secs, 3600);
        assert_eq!(toml.pipeline.max_reruns, 5);
        assert_eq!(toml.pipeline.platform, None);
        assert_eq!(toml.agent.provider, AgentProvider::Claude);
        assert_eq!(toml.artifacts.backend, ArtifactBackend::Sqlite);
        assert!(toml.worker.reclaim_after_secs.is_none());
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let toml = ShipwrightToml::parse(
            r#"
            [worker]
            id = "worker-a"
            reclaim_after_secs = 7200

            [pipeline]
            platform = "gitlab"

            [quality]
            commands = ["make lint"]
            "#,
        )
        .unwrap();
        assert_eq!(toml.worker.id.as_deref(), Some("worker-a"));
        assert_eq!(toml.worker.reclaim_after_secs, Some(7200));
        assert_eq!(toml.worker.poll_interval_secs, 10);
        assert_eq!(toml.pipeline.platform, Some(Platform::Gitlab));
        assert_eq!(toml.quality.commands, vec!["make lint".to_string()]);
        assert_eq!(toml.database.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_parse_rejects_unknown_platform() {
        assert!(ShipwrightToml::parse("[pipeline]\nplatform = \"bitbucket\"").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut toml = ShipwrightToml::parse("[worker]\nid = \"from-file\"").unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("SHIPWRIGHT_WORKER_ID", "from-env"),
            ("SHIPWRIGHT_PLATFORM", "github"),
            ("SHIPWRIGHT_AGENT_PROVIDER", "opencode"),
            ("SHIPWRIGHT_WORKFLOW_TIMEOUT", "120"),
        ]);
        toml.apply_env(|k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(toml.worker.id.as_deref(), Some("from-env"));
        assert_eq!(toml.pipeline.platform, Some(Platform::Github));
        assert_eq!(toml.agent.provider, AgentProvider::Opencode);
        assert_eq!(toml.worker.workflow_timeout_secs, 120);
    }

    #[test]
    fn test_env_rejects_bad_timeout() {
        let mut toml = ShipwrightToml::default();
        let result = toml.apply_env(|k| {
            (k == "SHIPWRIGHT_WORKFLOW_TIMEOUT").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_flags_bad_values() {
        let mut toml = ShipwrightToml::default();
        toml.pipeline.max_reruns = 0;
        toml.worker.reclaim_after_secs = Some(10);
        toml.worker.id = Some("  ".into());
        let problems = toml.validate();
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().any(|p| p.contains("max_reruns")));
        assert!(problems.iter().any(|p| p.contains("reclaim_after_secs")));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = ShipwrightToml::default();
        toml.worker.id = Some("w1".into());
        toml.pipeline.platform = Some(Platform::Github);
        toml.save(&path).unwrap();

        let loaded = ShipwrightToml::load(&path).unwrap();
        assert_eq!(loaded.worker.id.as_deref(), Some("w1"));
        assert_eq!(loaded.pipeline.platform, Some(Platform::Github));
    }

    #[test]
    fn test_resolved_paths_are_relative_to_project() {
        let config = ShipwrightConfig::from_toml(PathBuf::from("/work/app"), ShipwrightToml::default());
        assert_eq!(config.db_path(), PathBuf::from("/work/app/.shipwright/shipwright.db"));
        assert_eq!(config.artifacts_dir(), PathBuf::from("/work/app/.shipwright/workflows"));
        assert_eq!(config.repo_path(), PathBuf::from("/work/app"));
        assert_eq!(config.agent_command(), "claude");
    }
}
