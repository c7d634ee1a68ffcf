//! In-process access to a running broker.

use std::sync::Arc;

use agentbus_config::BrokerConfig;
use agentbus_core::connection::ConnectionId;
use agentbus_core::envelope::Envelope;
use agentbus_core::error::{Error, Result};
use agentbus_core::protocol::{BrokerEvent, BrokerRequest};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::broker::{Broker, BrokerInput, BrokerSnapshot};

/// Clonable handle to the broker task.
#[derive(Clone)]
pub struct BrokerHandle {
    inbox: mpsc::UnboundedSender<BrokerInput>,
    connection_buffer: usize,
}

impl BrokerHandle {
    /// Spawn a broker task on the current runtime.
    ///
    /// The task stops once this handle and every connection are dropped.
    pub fn spawn(config: &BrokerConfig) -> Self {
        let (inbox, rx) = mpsc::unbounded_channel();
        let broker = Broker::new(config);
        tokio::spawn(broker.run(rx));
        Self {
            inbox,
            connection_buffer: config.connection_buffer.max(1),
        }
    }

    /// Open a new connection. The first event it receives is `connected`.
    pub fn connect(&self) -> Result<BrokerConnection> {
        let id = ConnectionId::new();
        let (sender, events) = mpsc::channel(self.connection_buffer);
        self.inbox
            .send(BrokerInput::Connect {
                id: id.clone(),
                sender,
            })
            .map_err(|_| Error::ConnectionLost("broker is not running".into()))?;
        debug!(connection_id = %id, "Opened in-process broker connection");
        Ok(BrokerConnection {
            sender: BrokerSender {
                id: id.clone(),
                inbox: self.inbox.clone(),
                _guard: Arc::new(DisconnectGuard {
                    id,
                    inbox: self.inbox.clone(),
                }),
            },
            events,
        })
    }

    /// Stats and agent directory, without opening a connection.
    pub async fn snapshot(&self) -> Result<BrokerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.inbox
            .send(BrokerInput::Snapshot { reply })
            .map_err(|_| Error::ConnectionLost("broker is not running".into()))?;
        rx.await
            .map_err(|_| Error::ConnectionLost("broker stopped before replying".into()))
    }
}

/// Tells the broker the connection closed once the last sender clone is gone.
struct DisconnectGuard {
    id: ConnectionId,
    inbox: mpsc::UnboundedSender<BrokerInput>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let _ = self.inbox.send(BrokerInput::Disconnect {
            id: self.id.clone(),
        });
    }
}

/// The sending half of a connection. Clones share one connection.
#[derive(Clone)]
pub struct BrokerSender {
    id: ConnectionId,
    inbox: mpsc::UnboundedSender<BrokerInput>,
    _guard: Arc<DisconnectGuard>,
}

impl BrokerSender {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn send(&self, request: BrokerRequest) -> Result<()> {
        self.inbox
            .send(BrokerInput::Request {
                from: self.id.clone(),
                request,
            })
            .map_err(|_| Error::ConnectionLost("broker is not running".into()))
    }

    /// Send an untyped frame; unknown or malformed ones are dropped by the broker.
    pub fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        self.inbox
            .send(BrokerInput::Envelope {
                from: self.id.clone(),
                envelope,
            })
            .map_err(|_| Error::ConnectionLost("broker is not running".into()))
    }
}

/// One connection: a sender plus the queue of events addressed to it.
pub struct BrokerConnection {
    sender: BrokerSender,
    events: mpsc::Receiver<BrokerEvent>,
}

impl BrokerConnection {
    pub fn id(&self) -> &ConnectionId {
        self.sender.id()
    }

    pub fn send(&self, request: BrokerRequest) -> Result<()> {
        self.sender.send(request)
    }

    pub fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        self.sender.send_envelope(envelope)
    }

    /// Next event, or `None` once the broker dropped this connection.
    pub async fn recv(&mut self) -> Option<BrokerEvent> {
        self.events.recv().await
    }

    pub fn sender(&self) -> BrokerSender {
        self.sender.clone()
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (BrokerSender, mpsc::Receiver<BrokerEvent>) {
        (self.sender, self.events)
    }
}
