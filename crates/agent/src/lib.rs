//! Agent workers for AgentBus.
//!
//! A worker wraps one agent's conversational loop:
//!
//! 1. **Receive** a message from the host (or queue it behind the current turn)
//! 2. **Fetch context**: other agents' recent turns from the broker ring
//! 3. **Build the prompt**: system prompt + shared transcript + own history
//! 4. **Stream** the model's answer, relaying chunks and tool calls
//! 5. **Publish** the new turns to the ring and report `done`
//!
//! Tools are never run by the worker itself; requests travel through the
//! broker to the [`HostBridge`].

pub mod client;
pub mod host;
pub mod prompt;
pub mod worker;
pub mod worker_event;

pub use client::{BrokerClient, ToolBridge, ToolOutcome};
pub use host::HostBridge;
pub use worker::{AgentWorker, WorkerHandle};
pub use worker_event::{WorkerCommand, WorkerEvent};
