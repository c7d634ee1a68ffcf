//! Connection registry and agent directory.
//!
//! Owned by the broker actor and mutated only from its loop.

use std::collections::HashMap;

use agentbus_core::agent::{AgentRecord, STATUS_ACTIVE};
use agentbus_core::connection::{ConnectionId, ConnectionRole};
use agentbus_core::protocol::BrokerEvent;
use tokio::sync::mpsc;

/// One live connection.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub sender: mpsc::Sender<BrokerEvent>,
    pub agent_id: Option<String>,
    pub role: ConnectionRole,
    seq: u64,
}

/// What was left behind when a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub agent_id: Option<String>,
    pub role: ConnectionRole,
    /// The agent's directory record was removed
    pub released: bool,
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    agents: HashMap<String, AgentRecord>,
    host: Option<ConnectionId>,
    next_seq: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new, not yet registered connection.
    pub fn add(&mut self, id: ConnectionId, sender: mpsc::Sender<BrokerEvent>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.connections.insert(
            id,
            ConnectionEntry {
                sender,
                agent_id: None,
                role: ConnectionRole::Unknown,
                seq,
            },
        );
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&ConnectionEntry> {
        self.connections.get(id)
    }

    /// Attach an agent id and role to a connection.
    ///
    /// Agents get a directory record (created or refreshed). A host becomes
    /// the tool host, replacing any earlier one. Returns `false` for an
    /// unknown connection.
    pub fn register(&mut self, id: &ConnectionId, agent_id: &str, role: ConnectionRole) -> bool {
        let Some(entry) = self.connections.get_mut(id) else {
            return false;
        };
        let previous_id = entry.agent_id.replace(agent_id.to_string());
        let previous_role = std::mem::replace(&mut entry.role, role);

        if let Some(prev) = previous_id
            && previous_role == ConnectionRole::Agent
            && (prev != agent_id || role != ConnectionRole::Agent)
        {
            self.release_agent(&prev);
        }
        if previous_role == ConnectionRole::Host && role != ConnectionRole::Host {
            self.replace_host_if(id);
        }

        match role {
            ConnectionRole::Host => self.host = Some(id.clone()),
            _ => {
                self.agents
                    .entry(agent_id.to_string())
                    .and_modify(|r| r.touch(Some(STATUS_ACTIVE.into())))
                    .or_insert_with(|| AgentRecord::new(agent_id));
            }
        }
        true
    }

    /// Forget a connection. Returns `None` if it was already gone.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<Departure> {
        let entry = self.connections.remove(id)?;
        if entry.role == ConnectionRole::Host {
            self.replace_host_if(id);
        }
        let released = match (&entry.agent_id, entry.role) {
            (Some(agent_id), ConnectionRole::Agent) => self.release_agent(agent_id),
            _ => false,
        };
        Some(Departure {
            agent_id: entry.agent_id,
            role: entry.role,
            released,
        })
    }

    /// Drop the directory record unless another agent connection still uses the id.
    fn release_agent(&mut self, agent_id: &str) -> bool {
        let still_held = self
            .connections
            .values()
            .any(|c| c.role == ConnectionRole::Agent && c.agent_id.as_deref() == Some(agent_id));
        !still_held && self.agents.remove(agent_id).is_some()
    }

    /// If `id` was the host, fall back to the most recently added remaining host.
    fn replace_host_if(&mut self, id: &ConnectionId) {
        if self.host.as_ref() != Some(id) {
            return;
        }
        self.host = self
            .connections
            .iter()
            .filter(|(cid, c)| *cid != id && c.role == ConnectionRole::Host)
            .max_by_key(|(_, c)| c.seq)
            .map(|(cid, _)| cid.clone());
    }

    /// The earliest connection registered under `agent_id`.
    pub fn find_by_agent(&self, agent_id: &str) -> Option<ConnectionId> {
        self.connections
            .iter()
            .filter(|(_, c)| c.agent_id.as_deref() == Some(agent_id))
            .min_by_key(|(_, c)| c.seq)
            .map(|(id, _)| id.clone())
    }

    pub fn host(&self) -> Option<&ConnectionId> {
        self.host.as_ref()
    }

    /// Connection ids in connect order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<(&ConnectionId, u64)> =
            self.connections.iter().map(|(id, c)| (id, c.seq)).collect();
        ids.sort_unstable_by_key(|(_, seq)| *seq);
        ids.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// Agent directory snapshot, sorted by agent id.
    pub fn directory(&self) -> Vec<AgentRecord> {
        let mut agents: Vec<AgentRecord> = self.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Refresh an agent's record. Returns `false` if it is not registered.
    pub fn heartbeat(&mut self, agent_id: &str, status: Option<String>) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(record) => {
                record.touch(status);
                true
            }
            None => false,
        }
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentRecord> {
        self.agents.get(agent_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(reg: &mut Registry, name: &str) -> (ConnectionId, mpsc::Receiver<BrokerEvent>) {
        let (tx, rx) = mpsc::channel(4);
        let id = ConnectionId::from(name);
        reg.add(id.clone(), tx);
        (id, rx)
    }

    #[test]
    fn register_creates_directory_entry() {
        let mut reg = Registry::new();
        let (c1, _rx) = connect(&mut reg, "c1");
        assert!(reg.register(&c1, "a1", ConnectionRole::Agent));
        assert_eq!(reg.directory().len(), 1);
        assert_eq!(reg.directory()[0].status, "active");
        assert_eq!(reg.find_by_agent("a1"), Some(c1));
    }

    #[test]
    fn register_unknown_connection_fails() {
        let mut reg = Registry::new();
        assert!(!reg.register(&ConnectionId::from("ghost"), "a1", ConnectionRole::Agent));
        assert_eq!(reg.agent_count(), 0);
    }

    #[test]
    fn hosts_are_not_listed() {
        let mut reg = Registry::new();
        let (h, _rx) = connect(&mut reg, "h");
        reg.register(&h, "host", ConnectionRole::Host);
        assert!(reg.directory().is_empty());
        assert_eq!(reg.host(), Some(&h));
    }

    #[test]
    fn latest_host_wins_and_falls_back() {
        let mut reg = Registry::new();
        let (h1, _r1) = connect(&mut reg, "h1");
        let (h2, _r2) = connect(&mut reg, "h2");
        reg.register(&h1, "host", ConnectionRole::Host);
        reg.register(&h2, "host", ConnectionRole::Host);
        assert_eq!(reg.host(), Some(&h2));

        reg.remove(&h2);
        assert_eq!(reg.host(), Some(&h1));
        reg.remove(&h1);
        assert_eq!(reg.host(), None);
    }

    #[test]
    fn shared_agent_id_kept_until_last_connection_leaves() {
        let mut reg = Registry::new();
        let (c1, _r1) = connect(&mut reg, "c1");
        let (c2, _r2) = connect(&mut reg, "c2");
        reg.register(&c1, "dup", ConnectionRole::Agent);
        reg.register(&c2, "dup", ConnectionRole::Agent);
        assert_eq!(reg.find_by_agent("dup"), Some(c1.clone()));

        let first = reg.remove(&c1).unwrap();
        assert!(!first.released);
        assert!(reg.agent("dup").is_some());

        let second = reg.remove(&c2).unwrap();
        assert!(second.released);
        assert!(reg.agent("dup").is_none());
        assert!(reg.remove(&c2).is_none());
    }

    #[test]
    fn re_register_under_new_id_releases_old_record() {
        let mut reg = Registry::new();
        let (c1, _r1) = connect(&mut reg, "c1");
        reg.register(&c1, "old", ConnectionRole::Agent);
        reg.register(&c1, "new", ConnectionRole::Agent);
        assert!(reg.agent("old").is_none());
        assert!(reg.agent("new").is_some());
    }

    #[test]
    fn heartbeat_only_touches_registered_agents() {
        let mut reg = Registry::new();
        let (c1, _r1) = connect(&mut reg, "c1");
        reg.register(&c1, "a1", ConnectionRole::Agent);
        assert!(reg.heartbeat("a1", Some("busy".into())));
        assert_eq!(reg.agent("a1").unwrap().status, "busy");
        assert!(!reg.heartbeat("nobody", None));
    }

    #[test]
    fn ids_follow_connect_order() {
        let mut reg = Registry::new();
        let (z, _r1) = connect(&mut reg, "z");
        let (a, _r2) = connect(&mut reg, "a");
        assert_eq!(reg.ids(), vec![z, a]);
    }
}
