//! A worker's side of the broker connection.
//!
//! Request/response exchanges over the broker (ring fetches, tool calls)
//! are correlated through [`PendingCalls`]. The client also mirrors every
//! `ring_update` it sees so context can still be built when the broker does
//! not answer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use agentbus_broker::{BrokerSender, RingBuffer};
use agentbus_config::WorkerConfig;
use agentbus_core::connection::ConnectionRole;
use agentbus_core::error::{Error, Result};
use agentbus_core::message::Turn;
use agentbus_core::pending::{PendingCalls, PendingError};
use agentbus_core::protocol::{BrokerEvent, BrokerRequest};
use agentbus_core::ring::RingEntry;
use agentbus_core::tool::ToolInvoker;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Result of a tool call: a value or the host's error message.
pub type ToolOutcome = std::result::Result<serde_json::Value, String>;

pub struct BrokerClient {
    sender: BrokerSender,
    ring_requests: PendingCalls<Vec<RingEntry>>,
    tool_calls: PendingCalls<ToolOutcome>,
    mirror: Mutex<RingBuffer>,
    ring_fetch_timeout: Duration,
    tool_timeout: Duration,
    online: AtomicBool,
}

impl BrokerClient {
    pub fn new(sender: BrokerSender, settings: &WorkerConfig) -> Self {
        Self {
            sender,
            ring_requests: PendingCalls::new(),
            tool_calls: PendingCalls::new(),
            mirror: Mutex::new(RingBuffer::new(settings.local_ring_capacity)),
            ring_fetch_timeout: settings.ring_fetch_timeout(),
            tool_timeout: settings.tool_timeout(),
            online: AtomicBool::new(true),
        }
    }

    fn mirror(&self) -> MutexGuard<'_, RingBuffer> {
        self.mirror.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, agent_id: &str) -> Result<()> {
        self.sender.send(BrokerRequest::Register {
            agent_id: agent_id.to_string(),
            role: ConnectionRole::Agent,
        })
    }

    pub fn unregister(&self) -> Result<()> {
        self.sender.send(BrokerRequest::Unregister {})
    }

    pub fn heartbeat(&self, agent_id: &str, status: &str) -> Result<()> {
        self.sender.send(BrokerRequest::Heartbeat {
            agent_id: Some(agent_id.to_string()),
            status: Some(status.to_string()),
        })
    }

    /// The broker dropped this connection; stop waiting on it.
    ///
    /// Pending ring fetches fall back to the mirror and pending tool calls
    /// fail with [`Error::ConnectionLost`] instead of running out their timeout.
    pub fn mark_offline(&self) {
        if self.online.swap(false, Ordering::SeqCst) {
            warn!(connection_id = %self.sender.id(), "Broker connection lost; using local ring mirror");
        }
        let ring_requests = self.ring_requests.cancel_all();
        let tool_calls = self.tool_calls.cancel_all();
        if ring_requests + tool_calls > 0 {
            debug!(ring_requests, tool_calls, "Cancelled calls pending on the lost broker");
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Recent entries written by anyone but `exclude`, most-recent-last.
    ///
    /// Asks the broker first. If the request cannot be sent or no
    /// `ring_context` arrives in time, the local mirror answers instead.
    pub async fn fetch_context(&self, exclude: &str, limit: usize) -> Vec<RingEntry> {
        if !self.is_online() {
            return self.mirror().context(Some(exclude), limit);
        }

        let request_id = format!("ring-{}", uuid::Uuid::new_v4());
        let rx = self.ring_requests.register(request_id.clone(), None);
        let sent = self.sender.send(BrokerRequest::RingGet {
            exclude_agent_id: Some(exclude.to_string()),
            limit: Some(limit),
            request_id: Some(request_id.clone()),
        });
        if let Err(e) = sent {
            self.ring_requests.cancel(&request_id);
            warn!(error = %e, "Ring fetch not sent; using local ring mirror");
            self.mark_offline();
            return self.mirror().context(Some(exclude), limit);
        }

        match self
            .ring_requests
            .wait(&request_id, rx, self.ring_fetch_timeout)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "No ring context from broker; using local ring mirror");
                self.mirror().context(Some(exclude), limit)
            }
        }
    }

    /// Append a turn to the shared ring.
    pub fn publish(&self, agent_id: &str, turn: Turn) -> Result<()> {
        self.sender.send(BrokerRequest::RingAdd {
            agent_id: Some(agent_id.to_string()),
            message: turn,
        })
    }

    /// Ask the host (through the broker) to run a tool, waiting up to the tool timeout.
    pub async fn execute_tool(
        &self,
        agent_id: &str,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        if !self.is_online() {
            return Err(Error::ConnectionLost(format!(
                "broker is unreachable; tool '{name}' not sent"
            )));
        }
        let call_id = format!("call-{}", uuid::Uuid::new_v4());
        let rx = self.tool_calls.register(call_id.clone(), Some(self.sender.id().clone()));
        let sent = self.sender.send(BrokerRequest::ToolRequest {
            call_id: call_id.clone(),
            tool: name.to_string(),
            args,
            agent_id: Some(agent_id.to_string()),
            connection_id: None,
        });
        if let Err(e) = sent {
            self.tool_calls.cancel(&call_id);
            return Err(e);
        }
        debug!(call_id = %call_id, tool = %name, agent_id = %agent_id, "Tool request sent");

        match self.tool_calls.wait(&call_id, rx, self.tool_timeout).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(Error::Tool(message)),
            Err(PendingError::TimedOut(timeout)) => {
                warn!(call_id = %call_id, tool = %name, "Tool call timed out");
                Err(Error::ToolTimeout {
                    call_id,
                    tool_name: name.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
            Err(PendingError::Cancelled) => Err(Error::ConnectionLost(format!(
                "tool call {call_id} was cancelled"
            ))),
        }
    }

    /// Settle a pending tool call. Unknown or already settled ids are ignored.
    pub fn resolve_tool(&self, call_id: &str, result: serde_json::Value, error: Option<String>) -> bool {
        let outcome = match error {
            Some(message) => Err(message),
            None => Ok(result),
        };
        self.tool_calls.resolve(call_id, outcome)
    }

    /// Feed a broker event in. Returns `true` if the client consumed it.
    pub fn handle_event(&self, event: BrokerEvent) -> bool {
        match event {
            BrokerEvent::RingContext {
                entries,
                request_id: Some(request_id),
            } => {
                self.ring_requests.resolve(&request_id, entries);
                true
            }
            BrokerEvent::RingUpdate { entry, .. } => {
                self.mirror().push(entry);
                true
            }
            BrokerEvent::RingCleared {} => {
                self.mirror().clear();
                true
            }
            BrokerEvent::ToolResult {
                call_id,
                result,
                error,
            } => {
                self.resolve_tool(&call_id, result, error);
                true
            }
            _ => false,
        }
    }

    /// Correlation ids of tool calls still waiting for a result.
    pub fn tool_calls_in_flight(&self) -> Vec<String> {
        self.tool_calls.ids()
    }

    pub fn mirror_len(&self) -> usize {
        self.mirror().len()
    }
}

/// The tool handle a model adapter gets for one agent.
pub struct ToolBridge {
    client: Arc<BrokerClient>,
    agent_id: String,
}

impl ToolBridge {
    pub fn new(client: Arc<BrokerClient>, agent_id: impl Into<String>) -> Self {
        Self {
            client,
            agent_id: agent_id.into(),
        }
    }
}

#[async_trait]
impl ToolInvoker for ToolBridge {
    async fn execute_tool(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value> {
        self.client.execute_tool(&self.agent_id, name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbus_broker::BrokerHandle;
    use agentbus_config::BrokerConfig;
    use agentbus_core::ring::MAX_CONTENT_CHARS;

    fn settings() -> WorkerConfig {
        WorkerConfig {
            ring_fetch_timeout_ms: 200,
            tool_timeout_secs: 60,
            ..WorkerConfig::default()
        }
    }

    #[tokio::test]
    async fn mirror_answers_when_broker_is_silent() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        // Events are never pumped into the client, so the broker reply is never seen.
        let conn = broker.connect().unwrap();
        let (sender, _events) = conn.split();
        let client = BrokerClient::new(sender, &settings());

        client.handle_event(BrokerEvent::RingUpdate {
            entry: RingEntry::new("a2", Turn::user("from a2"), MAX_CONTENT_CHARS),
            size: 1,
        });
        client.handle_event(BrokerEvent::RingUpdate {
            entry: RingEntry::new("a1", Turn::user("mine"), MAX_CONTENT_CHARS),
            size: 2,
        });

        let context = client.fetch_context("a1", 20).await;
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].content, "from a2");
    }

    #[tokio::test]
    async fn offline_client_skips_the_broker() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let (sender, _events) = broker.connect().unwrap().split();
        let client = BrokerClient::new(sender, &settings());
        client.mark_offline();
        assert!(!client.is_online());
        assert!(client.fetch_context("a1", 20).await.is_empty());
    }

    #[tokio::test]
    async fn ring_cleared_empties_mirror() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let (sender, _events) = broker.connect().unwrap().split();
        let client = BrokerClient::new(sender, &settings());
        client.handle_event(BrokerEvent::RingUpdate {
            entry: RingEntry::new("a2", Turn::user("x"), MAX_CONTENT_CHARS),
            size: 1,
        });
        assert_eq!(client.mirror_len(), 1);
        assert!(client.handle_event(BrokerEvent::RingCleared {}));
        assert_eq!(client.mirror_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_call_times_out_and_late_result_is_ignored() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let (sender, _events) = broker.connect().unwrap().split();
        let client = Arc::new(BrokerClient::new(sender, &settings()));

        let err = client
            .execute_tool("a1", "dom_query", serde_json::json!({}))
            .await
            .unwrap_err();
        let call_id = match err {
            Error::ToolTimeout {
                call_id,
                tool_name,
                timeout_secs,
            } => {
                assert_eq!(tool_name, "dom_query");
                assert_eq!(timeout_secs, 60);
                call_id
            }
            other => panic!("unexpected {other:?}"),
        };
        assert!(!client.resolve_tool(&call_id, serde_json::json!("late"), None));
    }

    #[tokio::test]
    async fn direct_resolution_completes_tool_call() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let (sender, _events) = broker.connect().unwrap().split();
        let client = Arc::new(BrokerClient::new(sender, &settings()));

        let bridge = ToolBridge::new(client.clone(), "a1");
        let call = tokio::spawn(async move {
            bridge
                .execute_tool("lookup", serde_json::json!({"q": 1}))
                .await
        });

        // Wait until the call is registered, then answer it like a host would.
        let call_id = loop {
            if let Some(id) = client.tool_calls_in_flight().into_iter().next() {
                break id;
            }
            tokio::task::yield_now().await;
        };
        assert!(client.resolve_tool(&call_id, serde_json::Value::Null, Some("denied".into())));

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Tool(ref m) if m == "denied"));
    }

    #[tokio::test]
    async fn going_offline_fails_tool_calls_in_flight() {
        let broker = BrokerHandle::spawn(&BrokerConfig::default());
        let (sender, _events) = broker.connect().unwrap().split();
        let client = Arc::new(BrokerClient::new(sender, &settings()));

        let bridge = ToolBridge::new(client.clone(), "a1");
        let call = tokio::spawn(async move {
            bridge.execute_tool("lookup", serde_json::json!({})).await
        });
        while client.tool_calls_in_flight().is_empty() {
            tokio::task::yield_now().await;
        }

        client.mark_offline();
        assert!(client.tool_calls_in_flight().is_empty());
        // Well inside the 60s tool timeout.
        let err = tokio::time::timeout(Duration::from_secs(1), call)
            .await
            .expect("tool call still waiting after going offline")
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));

        // Later calls fail without reaching the broker.
        let err = client
            .execute_tool("a1", "lookup", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert!(client.tool_calls_in_flight().is_empty());
    }
}
