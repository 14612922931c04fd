//! Realtime event types and serialization
//!
//! Defines channel naming, client-to-server control frames, and the
//! server-to-client event envelope. Event payloads always carry full entity
//! snapshots so clients can overwrite local state without diffing.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use supportdesk_shared::{AgentSnapshot, ConversationSnapshot, MessageSnapshot};

// =============================================================================
// Channels
// =============================================================================

/// Channel every agent dashboard subscribes to for presence updates.
pub const AGENT_PRESENCE_CHANNEL: &str = "agents:presence";

/// Per-conversation channel shared by the customer and viewing agents.
pub fn conversation_channel(conversation_id: Uuid) -> String {
    format!("conversation:{conversation_id}")
}

/// Per-agent channel carrying events for that agent's assigned work.
pub fn agent_queue_channel(agent_id: Uuid) -> String {
    format!("agent:{agent_id}:queue")
}

// =============================================================================
// Client-to-Server Control Frames
// =============================================================================

/// Control frames accepted over an established connection
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Heartbeat ping to keep the connection alive
    Ping,

    /// Subscribe to a conversation channel (agents only)
    SubscribeConversation { conversation_id: Uuid },

    /// Unsubscribe from a conversation channel (agents only)
    UnsubscribeConversation { conversation_id: Uuid },

    /// Start typing in a conversation (agents only)
    TypingStart { conversation_id: Uuid },

    /// Stop typing in a conversation (agents only)
    TypingStop { conversation_id: Uuid },
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "event", content = "payload")]
pub enum ServerEvent {
    /// A message was committed to a conversation
    #[serde(rename = "message.created")]
    MessageCreated {
        conversation_id: Uuid,
        message: MessageSnapshot,
    },

    /// Conversation state changed (status, assignment, timestamps)
    #[serde(rename = "conversation.updated")]
    ConversationUpdated { conversation: ConversationSnapshot },

    /// An agent was assigned to a conversation
    #[serde(rename = "agent.assigned")]
    AgentAssigned {
        conversation: ConversationSnapshot,
        agent: AgentSnapshot,
    },

    /// Conversation reached its terminal state
    #[serde(rename = "chat.closed")]
    ChatClosed { conversation: ConversationSnapshot },

    /// Agent presence changed
    #[serde(rename = "agent.presence.changed")]
    AgentPresenceChanged { agent: AgentSnapshot },

    /// Ephemeral typing signal; last write wins, never persisted
    #[serde(rename = "agent.typing")]
    AgentTyping {
        conversation_id: Uuid,
        agent_id: Uuid,
        is_typing: bool,
    },

    /// Connection acknowledged; the client must resync now
    #[serde(rename = "system.connected")]
    Connected { role: String, channels: Vec<String> },

    /// Heartbeat response
    #[serde(rename = "system.pong")]
    Pong,

    /// Subscription acknowledged
    #[serde(rename = "system.subscribed")]
    Subscribed { channel: String },

    /// Unsubscription acknowledged
    #[serde(rename = "system.unsubscribed")]
    Unsubscribed { channel: String },

    /// Connection-scoped error report
    #[serde(rename = "system.error")]
    Error { detail: String },
}

/// Wire envelope: event name + payload, the channel it was published on,
/// and the server timestamp.
#[derive(Debug, Serialize, Clone)]
pub struct EventFrame {
    #[serde(flatten)]
    pub event: ServerEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
}

impl EventFrame {
    pub fn new(event: ServerEvent, channel: Option<String>) -> Self {
        Self {
            event,
            channel,
            sent_at: OffsetDateTime::now_utc(),
        }
    }
}
