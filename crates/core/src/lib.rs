//! # AgentBus Core
//!
//! Domain types, wire protocol, traits, and error definitions for the
//! AgentBus multi-agent broker. This crate has **zero framework
//! dependencies**: it defines the model that the broker, the agent
//! workers, and the transports all implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (model backend, tool host) is a trait here.
//! Implementations live in their respective crates or in the host. This
//! enables:
//! - Swapping model adapters by name at runtime
//! - Easy testing with scripted adapters and in-process connections
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod message;
pub mod model;
pub mod pending;
pub mod protocol;
pub mod ring;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentConfig, AgentRecord};
pub use connection::{ConnectionId, ConnectionRole};
pub use envelope::Envelope;
pub use error::{EnvelopeError, Error, ModelError, Result};
pub use message::{ConversationState, Role, Turn};
pub use model::{ModelAdapter, ModelEvent, ModelRequest, ModelStream, ToolDefinition};
pub use pending::{PendingCalls, PendingError};
pub use protocol::{BrokerEvent, BrokerRequest, BrokerStats};
pub use ring::RingEntry;
pub use tool::{Tool, ToolCallRequest, ToolInvoker, ToolRegistry};
