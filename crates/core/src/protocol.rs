//! Broker wire protocol.
//!
//! `BrokerRequest` is everything a connection may send to the broker;
//! `BrokerEvent` is everything the broker sends back. Both serialize to the
//! `{type, data}` envelope with camelCase payload fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentRecord;
use crate::connection::{ConnectionId, ConnectionRole};
use crate::envelope::Envelope;
use crate::error::EnvelopeError;
use crate::message::Turn;
use crate::ring::RingEntry;

/// Messages a connection sends to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum BrokerRequest {
    Register {
        agent_id: String,
        #[serde(default)]
        role: ConnectionRole,
    },

    Unregister {},

    /// Append a turn to the shared ring. `agent_id` defaults to the sender's.
    RingAdd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        message: Turn,
    },

    RingGet {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exclude_agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
        /// Echoed in the `ring_context` reply
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    RingClear {},

    /// Fan out to every other connection.
    Broadcast { message: serde_json::Value },

    /// Deliver to the one connection registered under `target_agent_id`.
    Send {
        target_agent_id: String,
        message: serde_json::Value,
    },

    GetAgents {},

    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },

    GetStats {},

    /// Ask the host to run a tool. The broker fills in the origin fields.
    ToolRequest {
        call_id: String,
        tool: String,
        #[serde(default)]
        args: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connection_id: Option<ConnectionId>,
    },

    /// A host's answer, routed to `connection_id` only.
    ToolResult {
        call_id: String,
        connection_id: ConnectionId,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl BrokerRequest {
    /// Every inbound tag the broker understands.
    pub const TYPES: &'static [&'static str] = &[
        "register",
        "unregister",
        "ring_add",
        "ring_get",
        "ring_clear",
        "broadcast",
        "send",
        "get_agents",
        "heartbeat",
        "get_stats",
        "tool_request",
        "tool_result",
    ];

    /// Decode an envelope; unknown tags yield [`EnvelopeError::UnknownType`].
    pub fn from_envelope(envelope: Envelope) -> Result<Self, EnvelopeError> {
        envelope.decode(Self::TYPES)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Unregister {} => "unregister",
            Self::RingAdd { .. } => "ring_add",
            Self::RingGet { .. } => "ring_get",
            Self::RingClear {} => "ring_clear",
            Self::Broadcast { .. } => "broadcast",
            Self::Send { .. } => "send",
            Self::GetAgents {} => "get_agents",
            Self::Heartbeat { .. } => "heartbeat",
            Self::GetStats {} => "get_stats",
            Self::ToolRequest { .. } => "tool_request",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}

/// Counters reported by `get_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    pub connections: usize,
    pub agents: usize,
    pub ring_size: usize,
    pub ring_capacity: usize,
}

/// Messages the broker sends to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum BrokerEvent {
    /// Handshake sent once per connection.
    Connected {
        connection_id: ConnectionId,
        ring_size: usize,
        agents: Vec<AgentRecord>,
    },

    Registered {
        connection_id: ConnectionId,
        agent_id: String,
        role: ConnectionRole,
        agents: Vec<AgentRecord>,
    },

    AgentJoined {
        agent_id: String,
        agents: Vec<AgentRecord>,
    },

    AgentLeft {
        agent_id: String,
        agents: Vec<AgentRecord>,
    },

    RingUpdate { entry: RingEntry, size: usize },

    RingContext {
        entries: Vec<RingEntry>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    RingCleared {},

    BroadcastMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        message: serde_json::Value,
    },

    DirectMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        message: serde_json::Value,
    },

    SendResult {
        target_agent_id: String,
        delivered: bool,
    },

    AgentsList { agents: Vec<AgentRecord> },

    HeartbeatAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        registered: bool,
        timestamp: DateTime<Utc>,
    },

    Stats(BrokerStats),

    /// Forwarded to the host, annotated with the requester.
    ToolRequest {
        call_id: String,
        tool: String,
        args: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        connection_id: ConnectionId,
    },

    /// Forwarded back to the requesting connection.
    ToolResult {
        call_id: String,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl BrokerEvent {
    /// Every outbound tag.
    pub const TYPES: &'static [&'static str] = &[
        "connected",
        "registered",
        "agent_joined",
        "agent_left",
        "ring_update",
        "ring_context",
        "ring_cleared",
        "broadcast_message",
        "direct_message",
        "send_result",
        "agents_list",
        "heartbeat_ack",
        "stats",
        "tool_request",
        "tool_result",
    ];

    pub fn from_envelope(envelope: Envelope) -> Result<Self, EnvelopeError> {
        envelope.decode(Self::TYPES)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Registered { .. } => "registered",
            Self::AgentJoined { .. } => "agent_joined",
            Self::AgentLeft { .. } => "agent_left",
            Self::RingUpdate { .. } => "ring_update",
            Self::RingContext { .. } => "ring_context",
            Self::RingCleared {} => "ring_cleared",
            Self::BroadcastMessage { .. } => "broadcast_message",
            Self::DirectMessage { .. } => "direct_message",
            Self::SendResult { .. } => "send_result",
            Self::AgentsList { .. } => "agents_list",
            Self::HeartbeatAck { .. } => "heartbeat_ack",
            Self::Stats(_) => "stats",
            Self::ToolRequest { .. } => "tool_request",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_uses_camel_case_payload() {
        let req = BrokerRequest::Register {
            agent_id: "a1".into(),
            role: ConnectionRole::Agent,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, json!({"type": "register", "data": {"agentId": "a1", "role": "agent"}}));
    }

    #[test]
    fn ring_get_decodes_with_defaults() {
        let env = Envelope::new("ring_get", json!({"excludeAgentId": "a1"}));
        let req = BrokerRequest::from_envelope(env).unwrap();
        assert_eq!(
            req,
            BrokerRequest::RingGet {
                exclude_agent_id: Some("a1".into()),
                limit: None,
                request_id: None,
            }
        );
    }

    #[test]
    fn empty_variants_decode_without_data() {
        for kind in ["unregister", "ring_clear", "get_agents", "get_stats"] {
            let env = Envelope::from_json(&format!(r#"{{"type":"{kind}"}}"#)).unwrap();
            let req = BrokerRequest::from_envelope(env).unwrap();
            assert_eq!(req.kind(), kind);
        }
    }

    #[test]
    fn every_declared_request_type_matches_kind() {
        let samples = vec![
            BrokerRequest::Register { agent_id: "a".into(), role: ConnectionRole::Host },
            BrokerRequest::Unregister {},
            BrokerRequest::RingAdd { agent_id: None, message: Turn::user("x") },
            BrokerRequest::RingGet { exclude_agent_id: None, limit: Some(3), request_id: None },
            BrokerRequest::RingClear {},
            BrokerRequest::Broadcast { message: json!({"k": 1}) },
            BrokerRequest::Send { target_agent_id: "b".into(), message: json!("hi") },
            BrokerRequest::GetAgents {},
            BrokerRequest::Heartbeat { agent_id: None, status: Some("busy".into()) },
            BrokerRequest::GetStats {},
            BrokerRequest::ToolRequest {
                call_id: "c".into(),
                tool: "t".into(),
                args: json!({}),
                agent_id: None,
                connection_id: None,
            },
            BrokerRequest::ToolResult {
                call_id: "c".into(),
                connection_id: ConnectionId::from("conn-1"),
                result: json!(42),
                error: None,
            },
        ];
        assert_eq!(samples.len(), BrokerRequest::TYPES.len());
        for req in samples {
            let env = Envelope::encode(&req).unwrap();
            assert_eq!(env.kind, req.kind());
            assert!(BrokerRequest::TYPES.contains(&env.kind.as_str()));
            assert_eq!(BrokerRequest::from_envelope(env).unwrap(), req);
        }
    }

    #[test]
    fn unknown_request_type_is_rejected() {
        let env = Envelope::new("ring_explode", json!({}));
        assert!(matches!(
            BrokerRequest::from_envelope(env),
            Err(EnvelopeError::UnknownType(_))
        ));
    }

    #[test]
    fn stats_event_is_flat() {
        let event = BrokerEvent::Stats(BrokerStats {
            connections: 2,
            agents: 1,
            ring_size: 5,
            ring_capacity: 1000,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stats");
        assert_eq!(json["data"]["ringCapacity"], 1000);
        assert_eq!(event.kind(), "stats");
    }

    #[test]
    fn forwarded_tool_request_carries_origin() {
        let event = BrokerEvent::ToolRequest {
            call_id: "call-9".into(),
            tool: "dom_query".into(),
            args: json!({"selector": "h1"}),
            agent_id: Some("a1".into()),
            connection_id: ConnectionId::from("conn-7"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["connectionId"], "conn-7");
        assert_eq!(json["data"]["agentId"], "a1");
        assert_eq!(json["data"]["callId"], "call-9");
    }
}
