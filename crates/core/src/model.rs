//! Model adapter trait: the abstraction over LLM backends.
//!
//! A model adapter turns a list of turns into a finite stream of events.
//! The worker relays each event as it arrives and never cancels a stream
//! mid-flight. No concrete provider wire protocol lives in this workspace;
//! hosts register their own adapters by name.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::agent::AgentConfig;
use crate::error::ModelError;
use crate::message::Turn;
use crate::tool::{ToolCallRequest, ToolInvoker};

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool's parameters
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Everything an adapter needs for one turn.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// System prompt first, then history, then the new user turn
    pub messages: Vec<Turn>,

    /// The requesting agent's configuration (model id, limits, key, tools)
    pub config: AgentConfig,
}

/// One event produced by a model stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelEvent {
    /// A text delta
    Text { text: String },

    /// The model requested a tool
    ToolCall { tool: ToolCallRequest },
}

/// The receiving end of a model stream. Closing the channel ends the turn.
pub type ModelStream = mpsc::Receiver<Result<ModelEvent, ModelError>>;

/// The core model adapter trait.
///
/// The worker calls `stream()` without knowing which backend answers.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Registry name for this adapter (e.g. "anthropic", "echo").
    fn name(&self) -> &str;

    /// Start a streaming turn.
    ///
    /// `tools` lets the adapter execute tool calls through the host bridge
    /// while the turn is running.
    async fn stream(
        &self,
        request: ModelRequest,
        tools: Arc<dyn ToolInvoker>,
    ) -> Result<ModelStream, ModelError>;
}
