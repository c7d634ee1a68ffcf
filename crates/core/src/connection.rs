//! Connection identity types shared by the broker and its clients.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for a broker connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn-{}", Uuid::new_v4()))
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a connection represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    /// An agent worker
    #[default]
    Agent,
    /// The host bridge that executes tools
    Host,
    /// Connected but not registered yet
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn connection_id_serializes_as_plain_string() {
        let id = ConnectionId::from("conn-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""conn-1""#);
    }

    #[test]
    fn role_defaults_to_agent() {
        assert_eq!(ConnectionRole::default(), ConnectionRole::Agent);
        let role: ConnectionRole = serde_json::from_str(r#""host""#).unwrap();
        assert_eq!(role, ConnectionRole::Host);
    }
}
