//! Scripted adapter: replays canned turns, for tests and demos.
//!
//! Each call to `stream` consumes the next scripted turn. Every request is
//! recorded so tests can assert on the prompt a worker built.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agentbus_core::error::ModelError;
use agentbus_core::model::{ModelAdapter, ModelEvent, ModelRequest, ModelStream};
use agentbus_core::tool::{ToolCallRequest, ToolInvoker};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// One step of a scripted turn.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit a text delta
    Text(String),

    /// Emit a tool-call event without running the tool
    ToolCall {
        name: String,
        args: serde_json::Value,
    },

    /// Emit a tool-call event, then run the tool and wait for its result
    InvokeTool {
        name: String,
        args: serde_json::Value,
    },

    /// Pause before the next step
    Delay(Duration),

    /// End the stream with an error
    Fail(String),
}

/// A whole scripted turn.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    Steps(Vec<ScriptStep>),
    /// `stream` itself returns an error
    StartError(String),
}

impl ScriptedTurn {
    /// A turn that streams the given chunks.
    pub fn chunks(chunks: &[&str]) -> Self {
        Self::Steps(
            chunks
                .iter()
                .map(|c| ScriptStep::Text((*c).to_string()))
                .collect(),
        )
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Replays [`ScriptedTurn`]s in order.
pub struct ScriptedAdapter {
    name: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<ModelRequest>>,
    tool_results: Arc<Mutex<Vec<Result<serde_json::Value, String>>>>,
}

impl ScriptedAdapter {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            name: "scripted".into(),
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            tool_results: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A single turn answering with one text chunk.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![ScriptedTurn::chunks(&[text])])
    }

    /// Report a different adapter name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Queue another turn.
    pub fn push_turn(&self, turn: ScriptedTurn) {
        lock(&self.turns).push_back(turn);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Outcomes of `InvokeTool` steps, in order.
    pub fn tool_results(&self) -> Vec<Result<serde_json::Value, String>> {
        lock(&self.tool_results).clone()
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ModelRequest,
        tools: Arc<dyn ToolInvoker>,
    ) -> Result<ModelStream, ModelError> {
        lock(&self.requests).push(request);

        let turn = lock(&self.turns).pop_front();
        let steps = match turn {
            Some(ScriptedTurn::Steps(steps)) => steps,
            Some(ScriptedTurn::StartError(reason)) => {
                return Err(ModelError::StartFailed(reason));
            }
            None => {
                return Err(ModelError::StartFailed(format!(
                    "{}: no more scripted turns",
                    self.name
                )));
            }
        };

        let (tx, rx) = mpsc::channel(32);
        let tool_results = self.tool_results.clone();

        tokio::spawn(async move {
            for (i, step) in steps.into_iter().enumerate() {
                let event = match step {
                    ScriptStep::Text(text) => Ok(ModelEvent::Text { text }),
                    ScriptStep::ToolCall { name, args } => Ok(ModelEvent::ToolCall {
                        tool: ToolCallRequest {
                            id: format!("scripted-{i}"),
                            name,
                            arguments: args,
                        },
                    }),
                    ScriptStep::InvokeTool { name, args } => {
                        let call = ToolCallRequest {
                            id: format!("scripted-{i}"),
                            name: name.clone(),
                            arguments: args.clone(),
                        };
                        if tx.send(Ok(ModelEvent::ToolCall { tool: call })).await.is_err() {
                            return;
                        }
                        let outcome = tools
                            .execute_tool(&name, args)
                            .await
                            .map_err(|e| e.to_string());
                        lock(&tool_results).push(outcome);
                        continue;
                    }
                    ScriptStep::Delay(d) => {
                        tokio::time::sleep(d).await;
                        continue;
                    }
                    ScriptStep::Fail(reason) => {
                        let _ = tx.send(Err(ModelError::StreamInterrupted(reason))).await;
                        return;
                    }
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok(rx)
    }
}
