//! Configuration loading, validation, and management for Skein.
//!
//! Loads configuration from `~/.skein/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.skein/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Turn controller settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Stream parser limits
    #[serde(default)]
    pub stream: StreamConfig,

    /// Tool routing settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Workspace sandbox roots
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Job store configuration
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Memory note settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Upper bound on model round-trips per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Token budget for each assembled prompt.
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_context_budget() -> usize {
    8192
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            context_budget: default_context_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Argument buffers larger than this mark the call invalid.
    #[serde(default = "default_max_argument_bytes")]
    pub max_argument_bytes: usize,
}

fn default_max_argument_bytes() -> usize {
    1024 * 1024
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_argument_bytes: default_max_argument_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// How long to wait for a remote peer before failing the call.
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// Permission-gated tools that are approved for every session.
    #[serde(default)]
    pub approved_tools: Vec<String>,
}

fn default_remote_timeout_ms() -> u64 {
    30_000
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            remote_timeout_ms: default_remote_timeout_ms(),
            approved_tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Sandbox root for local tools. Defaults to `~/.skein/workspace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_root: Option<PathBuf>,

    /// Sandbox root on the serving side of remote tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// SQLite database URL or path. `":memory:"` for an ephemeral store.
    #[serde(default = "default_jobs_database")]
    pub database: String,

    /// Autonomous dequeue polling interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_jobs_database() -> String {
    AppConfig::config_dir()
        .join("jobs.sqlite")
        .to_string_lossy()
        .into_owned()
}
fn default_poll_interval_ms() -> u64 {
    5_000
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            database: default_jobs_database(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Cumulative cost of always-append notes before they fall back to summaries.
    #[serde(default = "default_always_append_cap")]
    pub always_append_cap: usize,

    /// JSONL file notes are persisted to. `None` keeps notes in memory only.
    #[serde(default = "default_notes_file", skip_serializing_if = "Option::is_none")]
    pub notes_file: Option<PathBuf>,
}

fn default_always_append_cap() -> usize {
    1024
}
fn default_notes_file() -> Option<PathBuf> {
    Some(AppConfig::config_dir().join("notes.jsonl"))
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            always_append_cap: default_always_append_cap(),
            notes_file: default_notes_file(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (`SKEIN_*`)
    /// 2. Config file (`~/.skein/config.toml`)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_at(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply environment overrides.
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `SKEIN_*` overrides from the given lookup.
    fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("SKEIN_CONTEXT_BUDGET") {
            self.agent.context_budget = parse_env("SKEIN_CONTEXT_BUDGET", &value)?;
        }
        if let Some(value) = lookup("SKEIN_MAX_ITERATIONS") {
            self.agent.max_iterations = parse_env("SKEIN_MAX_ITERATIONS", &value)?;
        }
        if let Some(value) = lookup("SKEIN_REMOTE_TIMEOUT_MS") {
            self.tools.remote_timeout_ms = parse_env("SKEIN_REMOTE_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("SKEIN_JOBS_DATABASE") {
            self.jobs.database = value;
        }
        if let Some(value) = lookup("SKEIN_WORKSPACE") {
            self.workspace.local_root = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("SKEIN_LOG_FORMAT") {
            self.logging.format = match value.as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "SKEIN_LOG_FORMAT must be 'json' or 'pretty', got '{other}'"
                    )));
                }
            };
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".skein")
    }

    /// The local sandbox root, falling back to `~/.skein/workspace`.
    pub fn local_workspace(&self) -> PathBuf {
        self.workspace
            .local_root
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("workspace"))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.agent.context_budget == 0 {
            return Err(ConfigError::ValidationError(
                "agent.context_budget must be > 0".into(),
            ));
        }
        if self.tools.remote_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "tools.remote_timeout_ms must be > 0".into(),
            ));
        }
        if self.stream.max_argument_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "stream.max_argument_bytes must be > 0".into(),
            ));
        }
        if self.jobs.database.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "jobs.database must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} has invalid value '{value}'")))
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
