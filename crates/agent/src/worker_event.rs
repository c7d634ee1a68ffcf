//! Worker protocol.
//!
//! `WorkerCommand` is what the host sends a worker; `WorkerEvent` is what the
//! worker reports back. Both use the same `{type, data}` envelope as the
//! broker protocol:
//! - `ready`: init finished, the agent is registered
//! - `start`: a message began processing
//! - `chunk`: text delta plus everything accumulated so far
//! - `queued`: the message waits behind others (1 = next up)
//! - `tool_call`: the model asked for a tool
//! - `done`: the turn finished
//! - `error`: init or a turn failed

use agentbus_core::agent::AgentConfig;
use agentbus_core::envelope::Envelope;
use agentbus_core::error::EnvelopeError;
use agentbus_core::tool::ToolCallRequest;
use serde::{Deserialize, Serialize};

/// Commands a worker accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum WorkerCommand {
    Init {
        config: AgentConfig,
    },

    Message {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// A tool result delivered straight to the worker instead of via the broker.
    ToolResult {
        call_id: String,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Clear the conversation history once queued messages are done.
    Reset {},
}

impl WorkerCommand {
    pub const TYPES: &'static [&'static str] = &["init", "message", "tool_result", "reset"];

    pub fn from_envelope(envelope: Envelope) -> Result<Self, EnvelopeError> {
        envelope.decode(Self::TYPES)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "init",
            Self::Message { .. } => "message",
            Self::ToolResult { .. } => "tool_result",
            Self::Reset {} => "reset",
        }
    }
}

/// Events a worker emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum WorkerEvent {
    Ready {
        agent_id: String,
    },

    Start {
        message_id: String,
    },

    Chunk {
        message_id: String,
        text: String,
        accumulated: String,
    },

    Queued {
        message_id: String,
        position: usize,
    },

    ToolCall {
        message_id: String,
        tool: ToolCallRequest,
    },

    Done {
        message_id: String,
        response: String,
        tool_calls: Vec<ToolCallRequest>,
    },

    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        message: String,
    },
}

impl WorkerEvent {
    pub const TYPES: &'static [&'static str] = &[
        "ready",
        "start",
        "chunk",
        "queued",
        "tool_call",
        "done",
        "error",
    ];

    pub fn from_envelope(envelope: Envelope) -> Result<Self, EnvelopeError> {
        envelope.decode(Self::TYPES)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Start { .. } => "start",
            Self::Chunk { .. } => "chunk",
            Self::Queued { .. } => "queued",
            Self::ToolCall { .. } => "tool_call",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// The message this event belongs to, if any.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Ready { .. } => None,
            Self::Start { message_id }
            | Self::Chunk { message_id, .. }
            | Self::Queued { message_id, .. }
            | Self::ToolCall { message_id, .. }
            | Self::Done { message_id, .. } => Some(message_id),
            Self::Error { message_id, .. } => message_id.as_deref(),
        }
    }

    /// `done` or `error` for a message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { message_id: Some(_), .. })
    }
}
