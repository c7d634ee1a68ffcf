//! Error types for the AgentBus domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all AgentBus operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Model errors ---
    #[error("Unknown model provider: {0}")]
    UnknownModel(String),

    #[error("Model invocation failed: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool call {call_id} ({tool_name}) timed out after {timeout_secs}s")]
    ToolTimeout {
        call_id: String,
        tool_name: String,
        timeout_secs: u64,
    },

    #[error("Tool failed: {0}")]
    Tool(String),

    // --- Transport errors ---
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("Model stream could not be started: {0}")]
    StartFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),
}

/// Errors raised while decoding a wire envelope into a typed message.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Unknown message type: '{0}'")]
    UnknownType(String),

    #[error("Malformed '{kind}' payload: {reason}")]
    Malformed { kind: String, reason: String },

    #[error("Invalid envelope: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_timeout_displays_correctly() {
        let err = Error::ToolTimeout {
            call_id: "call-1".into(),
            tool_name: "dom_query".into(),
            timeout_secs: 60,
        };
        let text = err.to_string();
        assert!(text.contains("call-1"));
        assert!(text.contains("dom_query"));
        assert!(text.contains("60s"));
    }

    #[test]
    fn model_error_converts_into_domain_error() {
        let err: Error = ModelError::StreamInterrupted("socket reset".into()).into();
        assert!(matches!(err, Error::Model(_)));
        assert!(err.to_string().contains("socket reset"));
    }

    #[test]
    fn unknown_envelope_type_displays_tag() {
        let err = Error::from(EnvelopeError::UnknownType("ring_explode".into()));
        assert!(err.to_string().contains("ring_explode"));
    }
}
