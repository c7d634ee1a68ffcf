//! Agent configuration and directory types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ToolDefinition;

/// Status string reported for freshly registered agents.
pub const STATUS_ACTIVE: &str = "active";

/// Configuration for a single agent worker.
///
/// Delivered with the worker's `init` command or loaded from `[[agents]]`
/// in the config file. Only `id` is required; everything else has a default.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Unique agent id (required)
    #[serde(default)]
    pub id: String,

    /// Model provider name, looked up in the model registry
    #[serde(default = "default_model")]
    pub model: String,

    /// Provider-specific model id
    #[serde(default = "default_model_id", alias = "model_id")]
    pub model_id: String,

    /// Base system prompt; ring context is appended to it per turn
    #[serde(default = "default_system_prompt", alias = "system_prompt")]
    pub system_prompt: String,

    /// Tools the model may call through the host bridge
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(default = "default_max_tokens", alias = "max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "api_key")]
    pub api_key: Option<String>,
}

fn default_model() -> String {
    "anthropic".into()
}
fn default_model_id() -> String {
    "claude-sonnet-4".into()
}
fn default_system_prompt() -> String {
    "You are a helpful assistant working alongside other agents. \
     Use the shared context from other agents when it is relevant."
        .into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    1.0
}

impl AgentConfig {
    /// A config with every default applied and the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: default_model(),
            model_id: default_model_id(),
            system_prompt: default_system_prompt(),
            tools: Vec::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            api_key: None,
        }
    }

    /// Set the model provider name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the base system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the tools the model is told it may call.
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Check the required fields and value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::config("agent config is missing required field 'id'"));
        }
        if self.model.trim().is_empty() {
            return Err(Error::config(format!(
                "agent '{}' has an empty 'model' field",
                self.id
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::config(format!(
                "agent '{}': temperature must be between 0.0 and 2.0",
                self.id
            )));
        }
        if self.max_tokens == 0 {
            return Err(Error::config(format!(
                "agent '{}': maxTokens must be greater than 0",
                self.id
            )));
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("model_id", &self.model_id)
            .field("tools", &self.tools.len())
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field(
                "api_key",
                &self.api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// An entry in the broker's agent directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub agent_id: String,
    pub status: String,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl AgentRecord {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            status: STATUS_ACTIVE.into(),
            last_active: now,
            created_at: now,
        }
    }

    /// Refresh `lastActive` and optionally replace the status.
    pub fn touch(&mut self, status: Option<String>) {
        self.last_active = Utc::now();
        if let Some(status) = status {
            self.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied_for_minimal_config() {
        let config: AgentConfig = serde_json::from_str(r#"{"id":"w1"}"#).unwrap();
        assert_eq!(config.id, "w1");
        assert_eq!(config.model, "anthropic");
        assert_eq!(config.max_tokens, 4096);
        assert!((config.temperature - 1.0).abs() < f32::EPSILON);
        assert!(!config.system_prompt.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_id_is_a_configuration_error() {
        let config: AgentConfig = serde_json::from_str(r#"{"model":"echo"}"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        let mut config = AgentConfig::new("w1");
        config.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn camel_case_and_snake_case_keys_accepted() {
        let camel: AgentConfig =
            serde_json::from_str(r#"{"id":"a","modelId":"m1","maxTokens":10}"#).unwrap();
        let snake: AgentConfig =
            serde_json::from_str(r#"{"id":"a","model_id":"m1","max_tokens":10}"#).unwrap();
        assert_eq!(camel.model_id, "m1");
        assert_eq!(snake.model_id, "m1");
        assert_eq!(camel.max_tokens, snake.max_tokens);
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let mut config = AgentConfig::new("w1");
        config.api_key = Some("sk-very-secret".into());
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-very-secret"));
        assert!(dbg.contains("REDACTED"));
    }

    #[test]
    fn record_touch_updates_status() {
        let mut record = AgentRecord::new("a1");
        assert_eq!(record.status, STATUS_ACTIVE);
        let before = record.last_active;
        record.touch(Some("busy".into()));
        assert_eq!(record.status, "busy");
        assert!(record.last_active >= before);
        record.touch(None);
        assert_eq!(record.status, "busy");
    }
}
