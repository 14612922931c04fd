//! Realtime connection management
//!
//! Represents one active WebSocket connection with its declared role.

use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::EventFrame;

/// Role declared at connect time. Customers are bound to a single
/// conversation channel for the connection's lifetime; agents may manage
/// conversation subscriptions dynamically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionRole {
    Customer { customer_session_id: String },
    Agent { agent_id: Uuid },
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionRole::Customer { .. } => "customer",
            ConnectionRole::Agent { .. } => "agent",
        }
    }

    pub fn agent_id(&self) -> Option<Uuid> {
        match self {
            ConnectionRole::Agent { agent_id } => Some(*agent_id),
            ConnectionRole::Customer { .. } => None,
        }
    }
}

/// An active realtime connection
#[derive(Debug)]
pub struct Connection {
    /// Unique id for this connection
    pub connection_id: Uuid,

    /// Authenticated role and scope
    pub role: ConnectionRole,

    /// Channel used to push frames to this connection's socket task
    pub sender: mpsc::UnboundedSender<EventFrame>,
}

impl Connection {
    pub fn new(role: ConnectionRole, sender: mpsc::UnboundedSender<EventFrame>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            role,
            sender,
        }
    }

    /// Send a frame to this connection.
    ///
    /// Returns Err if the socket task has gone away; callers treat that as
    /// a dead connection to be cleaned up, never as a request failure.
    pub fn send(&self, frame: EventFrame) -> Result<(), mpsc::error::SendError<EventFrame>> {
        self.sender.send(frame)
    }
}
