//! Configuration loading, validation, and management for AgentBus.
//!
//! Loads configuration from `~/.agentbus/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use agentbus_core::agent::AgentConfig;
use agentbus_core::ring::{DEFAULT_CONTEXT_LIMIT, DEFAULT_RING_CAPACITY, MAX_CONTENT_CHARS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.agentbus/config.toml`.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Shared API key applied to agents that don't carry their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Broker configuration
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Agent worker runtime configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Agents to spawn at startup
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentConfig>,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("broker", &self.broker)
            .field("gateway", &self.gateway)
            .field("worker", &self.worker)
            .field("agents", &self.agents)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Maximum entries kept in the shared ring
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,

    /// Ring entry content is truncated to this many characters
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// `ring_get` limit when the request doesn't name one
    #[serde(default = "default_context_limit")]
    pub default_context_limit: usize,

    /// Per-connection outbound queue size; a full queue counts as a failed send
    #[serde(default = "default_connection_buffer")]
    pub connection_buffer: usize,
}

fn default_ring_capacity() -> usize {
    DEFAULT_RING_CAPACITY
}
fn default_max_content_chars() -> usize {
    MAX_CONTENT_CHARS
}
fn default_context_limit() -> usize {
    DEFAULT_CONTEXT_LIMIT
}
fn default_connection_buffer() -> usize {
    256
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            max_content_chars: default_max_content_chars(),
            default_context_limit: default_context_limit(),
            connection_buffer: default_connection_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default)]
    pub allow_public_bind: bool,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allow_public_bind: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Seconds to wait for a `tool_result` before failing the call
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Ring entries fetched per turn
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,

    /// How long to wait for `ring_context` before using the local mirror
    #[serde(default = "default_ring_fetch_timeout_ms")]
    pub ring_fetch_timeout_ms: u64,

    /// Backlog bound; `None` keeps the queue unbounded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue: Option<usize>,

    /// Heartbeat period; 0 disables heartbeats
    #[serde(default)]
    pub heartbeat_interval_secs: u64,

    /// Capacity of each worker's local ring mirror
    #[serde(default = "default_local_ring_capacity")]
    pub local_ring_capacity: usize,
}

fn default_tool_timeout_secs() -> u64 {
    60
}
fn default_ring_fetch_timeout_ms() -> u64 {
    5_000
}
fn default_local_ring_capacity() -> usize {
    200
}

impl WorkerConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn ring_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.ring_fetch_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            context_limit: default_context_limit(),
            ring_fetch_timeout_ms: default_ring_fetch_timeout_ms(),
            max_queue: None,
            heartbeat_interval_secs: 0,
            local_ring_capacity: default_local_ring_capacity(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.agentbus/config.toml).
    ///
    /// Also checks environment variables:
    /// - `AGENTBUS_API_KEY` (shared agent key when the file has none)
    /// - `AGENTBUS_HOST` / `AGENTBUS_PORT` (gateway bind address)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
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

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            self.api_key = std::env::var("AGENTBUS_API_KEY").ok();
        }

        if let Ok(host) = std::env::var("AGENTBUS_HOST") {
            self.gateway.host = host;
        }

        if let Ok(port) = std::env::var("AGENTBUS_PORT") {
            self.gateway.port = port.parse().map_err(|_| {
                ConfigError::ValidationError(format!("AGENTBUS_PORT is not a valid port: {port}"))
            })?;
        }

        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".agentbus")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.ring_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "broker.ring_capacity must be > 0".into(),
            ));
        }

        if self.broker.connection_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "broker.connection_buffer must be > 0".into(),
            ));
        }

        if self.worker.max_queue == Some(0) {
            return Err(ConfigError::ValidationError(
                "worker.max_queue must be > 0 when set".into(),
            ));
        }

        if !self.gateway.allow_public_bind && self.gateway.host == "0.0.0.0" {
            return Err(ConfigError::ValidationError(
                "gateway.host 0.0.0.0 requires gateway.allow_public_bind = true".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            agent
                .validate()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            if !seen.insert(agent.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate agent id '{}'",
                    agent.id
                )));
            }
        }

        Ok(())
    }

    /// Agent configs with the shared API key filled in where missing.
    pub fn agent_configs(&self) -> Vec<AgentConfig> {
        self.agents
            .iter()
            .cloned()
            .map(|mut agent| {
                if agent.api_key.is_none() {
                    agent.api_key = self.api_key.clone();
                }
                agent
            })
            .collect()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
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
