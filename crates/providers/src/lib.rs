//! Model adapters for AgentBus.
//!
//! All adapters implement the `agentbus_core::ModelAdapter` trait.
//! The registry selects the adapter named in an agent's configuration.

pub mod echo;
pub mod registry;
pub mod scripted;

pub use echo::EchoAdapter;
pub use registry::ModelRegistry;
pub use scripted::{ScriptStep, ScriptedAdapter, ScriptedTurn};
