//! The broker actor.
//!
//! One task owns a [`Broker`] and drains a single inbound channel that
//! multiplexes every connection. Each input is handled to completion before
//! the next is read, so ring mutations and broadcasts happen in receipt
//! order.
//!
//! Delivery is `try_send` into the target's bounded queue. A full or closed
//! queue marks the connection for purge; purges run after the current input
//! and synthesize the same `agent_left` an explicit unregister would.

use agentbus_config::BrokerConfig;
use agentbus_core::agent::AgentRecord;
use agentbus_core::connection::{ConnectionId, ConnectionRole};
use agentbus_core::envelope::Envelope;
use agentbus_core::protocol::{BrokerEvent, BrokerRequest, BrokerStats};
use agentbus_core::ring::RingEntry;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::registry::Registry;
use crate::ring::RingBuffer;

/// Everything the broker task can receive.
#[derive(Debug)]
pub enum BrokerInput {
    Connect {
        id: ConnectionId,
        sender: mpsc::Sender<BrokerEvent>,
    },
    /// A decoded request from a connection
    Request {
        from: ConnectionId,
        request: BrokerRequest,
    },
    /// A raw envelope; decoded (or logged and dropped) inside the actor
    Envelope {
        from: ConnectionId,
        envelope: Envelope,
    },
    Disconnect {
        id: ConnectionId,
    },
    Snapshot {
        reply: oneshot::Sender<BrokerSnapshot>,
    },
}

/// Read-only view for callers without a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSnapshot {
    pub stats: BrokerStats,
    pub agents: Vec<AgentRecord>,
}

/// Broker state. Only touched by the actor loop.
pub struct Broker {
    registry: Registry,
    ring: RingBuffer,
    max_content_chars: usize,
    default_context_limit: usize,
    /// Connections whose delivery failed during the current input
    doomed: Vec<ConnectionId>,
}

impl Broker {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            registry: Registry::new(),
            ring: RingBuffer::new(config.ring_capacity),
            max_content_chars: config.max_content_chars,
            default_context_limit: config.default_context_limit,
            doomed: Vec::new(),
        }
    }

    /// Run until every input sender is gone.
    pub async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<BrokerInput>) {
        info!(
            ring_capacity = self.ring.capacity(),
            "Broker started"
        );
        while let Some(input) = inbox.recv().await {
            self.handle(input);
        }
        info!(
            connections = self.registry.connection_count(),
            "Broker stopped"
        );
    }

    /// Handle one input to completion, including any purges it triggered.
    pub fn handle(&mut self, input: BrokerInput) {
        match input {
            BrokerInput::Connect { id, sender } => self.on_connect(id, sender),
            BrokerInput::Request { from, request } => self.on_request(&from, request),
            BrokerInput::Envelope { from, envelope } => {
                let kind = envelope.kind.clone();
                match BrokerRequest::from_envelope(envelope) {
                    Ok(request) => self.on_request(&from, request),
                    Err(e) => {
                        warn!(connection_id = %from, kind = %kind, error = %e, "Dropping frame");
                    }
                }
            }
            BrokerInput::Disconnect { id } => {
                if self.registry.get(&id).is_some() {
                    info!(connection_id = %id, "Connection closed");
                    self.remove_connection(&id);
                }
            }
            BrokerInput::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
        self.drain_doomed();
    }

    pub fn snapshot(&self) -> BrokerSnapshot {
        BrokerSnapshot {
            stats: self.stats(),
            agents: self.registry.directory(),
        }
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            connections: self.registry.connection_count(),
            agents: self.registry.agent_count(),
            ring_size: self.ring.len(),
            ring_capacity: self.ring.capacity(),
        }
    }

    fn on_connect(&mut self, id: ConnectionId, sender: mpsc::Sender<BrokerEvent>) {
        info!(connection_id = %id, "Connection opened");
        self.registry.add(id.clone(), sender);
        let hello = BrokerEvent::Connected {
            connection_id: id.clone(),
            ring_size: self.ring.len(),
            agents: self.registry.directory(),
        };
        self.deliver(&id, hello);
    }

    fn on_request(&mut self, from: &ConnectionId, request: BrokerRequest) {
        let Some(sender_agent) = self.registry.get(from).map(|c| c.agent_id.clone()) else {
            warn!(connection_id = %from, kind = request.kind(), "Request from unknown connection");
            return;
        };
        debug!(connection_id = %from, kind = request.kind(), "Broker request");

        match request {
            BrokerRequest::Register { agent_id, role } => self.register(from, agent_id, role),

            BrokerRequest::Unregister {} => {
                info!(connection_id = %from, agent_id = ?sender_agent, "Unregister");
                self.remove_connection(from);
            }

            BrokerRequest::RingAdd { agent_id, message } => {
                let author = agent_id
                    .or(sender_agent)
                    .unwrap_or_else(|| from.to_string());
                let entry = RingEntry::new(author, message, self.max_content_chars);
                let size = self.ring.push(entry.clone());
                self.broadcast(BrokerEvent::RingUpdate { entry, size }, None);
            }

            BrokerRequest::RingGet {
                exclude_agent_id,
                limit,
                request_id,
            } => {
                let limit = limit.unwrap_or(self.default_context_limit);
                let entries = self.ring.context(exclude_agent_id.as_deref(), limit);
                self.deliver(
                    from,
                    BrokerEvent::RingContext {
                        entries,
                        request_id,
                    },
                );
            }

            BrokerRequest::RingClear {} => {
                self.ring.clear();
                info!(connection_id = %from, "Ring cleared");
                self.broadcast(BrokerEvent::RingCleared {}, None);
            }

            BrokerRequest::Broadcast { message } => {
                let event = BrokerEvent::BroadcastMessage {
                    from: sender_agent,
                    message,
                };
                self.broadcast(event, Some(from));
            }

            BrokerRequest::Send {
                target_agent_id,
                message,
            } => {
                let delivered = match self.registry.find_by_agent(&target_agent_id) {
                    Some(target) => self.deliver(
                        &target,
                        BrokerEvent::DirectMessage {
                            from: sender_agent,
                            message,
                        },
                    ),
                    None => false,
                };
                debug!(target = %target_agent_id, delivered, "Directed message");
                self.deliver(
                    from,
                    BrokerEvent::SendResult {
                        target_agent_id,
                        delivered,
                    },
                );
            }

            BrokerRequest::GetAgents {} => {
                let agents = self.registry.directory();
                self.deliver(from, BrokerEvent::AgentsList { agents });
            }

            BrokerRequest::Heartbeat { agent_id, status } => {
                let agent_id = agent_id.or(sender_agent);
                let registered = agent_id
                    .as_deref()
                    .is_some_and(|id| self.registry.heartbeat(id, status));
                self.deliver(
                    from,
                    BrokerEvent::HeartbeatAck {
                        agent_id,
                        registered,
                        timestamp: Utc::now(),
                    },
                );
            }

            BrokerRequest::GetStats {} => {
                let stats = self.stats();
                self.deliver(from, BrokerEvent::Stats(stats));
            }

            BrokerRequest::ToolRequest {
                call_id,
                tool,
                args,
                agent_id,
                connection_id: _,
            } => {
                let agent_id = sender_agent.or(agent_id);
                let forwarded = match self.registry.host().cloned() {
                    Some(host) => {
                        debug!(call_id = %call_id, tool = %tool, host = %host, "Forwarding tool request");
                        self.deliver(
                            &host,
                            BrokerEvent::ToolRequest {
                                call_id: call_id.clone(),
                                tool,
                                args,
                                agent_id,
                                connection_id: from.clone(),
                            },
                        )
                    }
                    None => false,
                };
                if !forwarded {
                    warn!(call_id = %call_id, connection_id = %from, "No tool host available");
                    self.deliver(
                        from,
                        BrokerEvent::ToolResult {
                            call_id,
                            result: serde_json::Value::Null,
                            error: Some("no tool host registered".into()),
                        },
                    );
                }
            }

            BrokerRequest::ToolResult {
                call_id,
                connection_id,
                result,
                error,
            } => {
                if self.registry.get(&connection_id).is_none() {
                    debug!(call_id = %call_id, connection_id = %connection_id, "Tool result for departed connection");
                    return;
                }
                self.deliver(
                    &connection_id,
                    BrokerEvent::ToolResult {
                        call_id,
                        result,
                        error,
                    },
                );
            }
        }
    }

    fn register(&mut self, from: &ConnectionId, agent_id: String, role: ConnectionRole) {
        let role = match role {
            ConnectionRole::Unknown => ConnectionRole::Agent,
            other => other,
        };
        if agent_id.trim().is_empty() {
            warn!(connection_id = %from, "Register without agent id ignored");
            return;
        }
        if !self.registry.register(from, &agent_id, role) {
            return;
        }
        info!(connection_id = %from, agent_id = %agent_id, role = ?role, "Registered");

        let agents = self.registry.directory();
        self.deliver(
            from,
            BrokerEvent::Registered {
                connection_id: from.clone(),
                agent_id: agent_id.clone(),
                role,
                agents: agents.clone(),
            },
        );
        if role == ConnectionRole::Agent {
            self.broadcast(BrokerEvent::AgentJoined { agent_id, agents }, Some(from));
        }
    }

    /// Remove a connection and announce the departure of its agent.
    fn remove_connection(&mut self, id: &ConnectionId) {
        let Some(departure) = self.registry.remove(id) else {
            return;
        };
        if departure.role == ConnectionRole::Host {
            info!(connection_id = %id, "Tool host left");
        }
        if let (true, Some(agent_id)) = (departure.released, departure.agent_id) {
            info!(connection_id = %id, agent_id = %agent_id, "Agent left");
            let agents = self.registry.directory();
            self.broadcast(BrokerEvent::AgentLeft { agent_id, agents }, None);
        }
    }

    /// Best-effort fan-out to every connection except `exclude`.
    fn broadcast(&mut self, event: BrokerEvent, exclude: Option<&ConnectionId>) {
        for id in self.registry.ids() {
            if exclude == Some(&id) {
                continue;
            }
            self.deliver(&id, event.clone());
        }
    }

    /// Queue an event for one connection. A failed send marks it for purge.
    fn deliver(&mut self, to: &ConnectionId, event: BrokerEvent) -> bool {
        if self.doomed.contains(to) {
            return false;
        }
        let Some(entry) = self.registry.get(to) else {
            return false;
        };
        match entry.sender.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "closed",
                };
                warn!(connection_id = %to, reason, "Delivery failed; purging connection");
                self.doomed.push(to.clone());
                false
            }
        }
    }

    fn drain_doomed(&mut self) {
        while let Some(id) = self.doomed.pop() {
            self.remove_connection(&id);
        }
    }
}
