//! # AgentBus Broker
//!
//! The single coordinating actor. It owns the connection registry, the
//! agent directory and the shared ring buffer, and routes every message
//! between agent workers and the host bridge.
//!
//! All broker state lives inside one task. Connections talk to it through
//! a [`BrokerHandle`]; each connection gets its own bounded event queue that
//! the broker writes with `try_send`, so a slow peer can never stall it.

pub mod broker;
pub mod handle;
pub mod registry;
pub mod ring;

pub use broker::{Broker, BrokerInput, BrokerSnapshot};
pub use handle::{BrokerConnection, BrokerHandle, BrokerSender};
pub use registry::Registry;
pub use ring::RingBuffer;
