//! Host bridge: runs tools on behalf of agents.
//!
//! Registers with the broker as the `host` connection and answers every
//! forwarded `tool_request` with exactly one `tool_result`, addressed to the
//! requesting connection. Each request runs in its own task, so a slow tool
//! does not hold up the others.

use std::sync::Arc;

use agentbus_broker::{BrokerConnection, BrokerHandle, BrokerSender};
use agentbus_core::connection::{ConnectionId, ConnectionRole};
use agentbus_core::error::Result;
use agentbus_core::protocol::{BrokerEvent, BrokerRequest};
use agentbus_core::model::ToolDefinition;
use agentbus_core::tool::ToolRegistry;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Agent id the host registers under unless overridden.
pub const DEFAULT_HOST_ID: &str = "host";

pub struct HostBridge {
    tools: Arc<ToolRegistry>,
    host_id: String,
}

impl HostBridge {
    pub fn new(tools: ToolRegistry) -> Self {
        Self {
            tools: Arc::new(tools),
            host_id: DEFAULT_HOST_ID.into(),
        }
    }

    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = host_id.into();
        self
    }

    /// What this host can run, for agents to advertise to their models.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }

    /// Connect to `broker`, register as host and serve until the broker drops us.
    pub fn spawn(self, broker: &BrokerHandle) -> Result<JoinHandle<()>> {
        let connection = broker.connect()?;
        connection.send(BrokerRequest::Register {
            agent_id: self.host_id.clone(),
            role: ConnectionRole::Host,
        })?;
        Ok(tokio::spawn(self.serve(connection)))
    }

    async fn serve(self, connection: BrokerConnection) {
        let (sender, mut events) = connection.split();
        let tools: Vec<String> = self.definitions().into_iter().map(|d| d.name).collect();
        info!(host_id = %self.host_id, tools = ?tools, "Host bridge serving");

        while let Some(event) = events.recv().await {
            match event {
                BrokerEvent::ToolRequest {
                    call_id,
                    tool,
                    args,
                    agent_id,
                    connection_id,
                } => {
                    debug!(call_id = %call_id, tool = %tool, agent_id = ?agent_id, "Tool request");
                    let tools = self.tools.clone();
                    let sender = sender.clone();
                    tokio::spawn(async move {
                        let outcome = tools.execute(&tool, args).await;
                        reply(&sender, call_id, connection_id, outcome);
                    });
                }
                BrokerEvent::Registered { role, .. } if role == ConnectionRole::Host => {
                    info!(host_id = %self.host_id, "Host bridge registered");
                }
                other => debug!(kind = other.kind(), "Host bridge ignoring event"),
            }
        }
        info!(host_id = %self.host_id, "Host bridge stopped");
    }
}

fn reply(
    sender: &BrokerSender,
    call_id: String,
    connection_id: ConnectionId,
    outcome: std::result::Result<serde_json::Value, String>,
) {
    let (result, error) = match outcome {
        Ok(value) => (value, None),
        Err(message) => {
            warn!(call_id = %call_id, error = %message, "Tool failed");
            (serde_json::Value::Null, Some(message))
        }
    };
    let sent = sender.send(BrokerRequest::ToolResult {
        call_id,
        connection_id,
        result,
        error,
    });
    if let Err(e) = sent {
        warn!(error = %e, "Tool result not delivered");
    }
}
