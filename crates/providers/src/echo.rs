//! Echo adapter: streams the user's message back word by word.
//!
//! Used by the demo and for wiring checks; no network involved. A message of
//! the form `!tool <name> <json-args>` runs that tool through the host
//! bridge and streams its result instead.

use std::sync::Arc;
use std::time::Duration;

use agentbus_core::error::ModelError;
use agentbus_core::message::Role;
use agentbus_core::model::{ModelAdapter, ModelEvent, ModelRequest, ModelStream};
use agentbus_core::tool::{ToolCallRequest, ToolInvoker};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Echoes the last user turn.
pub struct EchoAdapter {
    chunk_delay: Option<Duration>,
}

impl EchoAdapter {
    pub fn new() -> Self {
        Self { chunk_delay: None }
    }

    /// Sleep between chunks to make streaming visible.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

impl Default for EchoAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `!tool <name> <json-args>`.
fn parse_tool_directive(content: &str) -> Option<(String, serde_json::Value)> {
    let rest = content.trim().strip_prefix("!tool ")?;
    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, serde_json::from_str(args.trim()).ok()?),
        None => (rest, serde_json::Value::Object(Default::default())),
    };
    Some((name.to_string(), args))
}

#[async_trait]
impl ModelAdapter for EchoAdapter {
    fn name(&self) -> &str {
        "echo"
    }

    async fn stream(
        &self,
        request: ModelRequest,
        tools: Arc<dyn ToolInvoker>,
    ) -> Result<ModelStream, ModelError> {
        let content = request
            .messages
            .iter()
            .rev()
            .find(|t| t.role == Role::User)
            .map(|t| t.content.clone())
            .ok_or_else(|| ModelError::StartFailed("no user turn to echo".into()))?;

        let (tx, rx) = mpsc::channel(64);
        let delay = self.chunk_delay;
        let agent_id = request.config.id.clone();

        tokio::spawn(async move {
            let reply = match parse_tool_directive(&content) {
                Some((name, args)) => {
                    let call = ToolCallRequest {
                        id: format!("echo-{}", uuid::Uuid::new_v4()),
                        name: name.clone(),
                        arguments: args.clone(),
                    };
                    if tx.send(Ok(ModelEvent::ToolCall { tool: call })).await.is_err() {
                        return;
                    }
                    match tools.execute_tool(&name, args).await {
                        Ok(value) => format!("{name} returned {value}"),
                        Err(e) => {
                            let _ = tx
                                .send(Err(ModelError::StreamInterrupted(e.to_string())))
                                .await;
                            return;
                        }
                    }
                }
                None => content,
            };

            debug!(agent_id = %agent_id, chars = reply.len(), "Echo stream started");
            for word in reply.split_inclusive(' ') {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let event = ModelEvent::Text {
                    text: word.to_string(),
                };
                if tx.send(Ok(event)).await.is_err() {
                    return; // receiver gone
                }
            }
        });

        Ok(rx)
    }
}
