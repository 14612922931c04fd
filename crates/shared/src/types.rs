//! Common types used across Supportdesk
//!
//! Domain enums, database row types, and the full-entity snapshot payloads
//! served over the HTTP and realtime APIs. Snapshots always carry the whole
//! entity so clients can blindly overwrite their local copy.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::UnknownEnumValue;

/// Maximum accepted length for message content, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 4000;

// =============================================================================
// Domain Enums
// =============================================================================

/// Conversation lifecycle status. Moves forward only:
/// `automated` -> `agent` -> `closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Automated,
    Agent,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Automated => "automated",
            ConversationStatus::Agent => "agent",
            ConversationStatus::Closed => "closed",
        }
    }
}

impl TryFrom<String> for ConversationStatus {
    type Error = UnknownEnumValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "automated" => Ok(ConversationStatus::Automated),
            "agent" => Ok(ConversationStatus::Agent),
            "closed" => Ok(ConversationStatus::Closed),
            _ => Err(UnknownEnumValue {
                kind: "conversation_status",
                value,
            }),
        }
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = UnknownEnumValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConversationStatus::try_from(s.to_string())
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    Customer,
    Bot,
    Agent,
    System,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderType::Customer => "customer",
            SenderType::Bot => "bot",
            SenderType::Agent => "agent",
            SenderType::System => "system",
        }
    }
}

impl TryFrom<String> for SenderType {
    type Error = UnknownEnumValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "customer" => Ok(SenderType::Customer),
            "bot" => Ok(SenderType::Bot),
            "agent" => Ok(SenderType::Agent),
            "system" => Ok(SenderType::System),
            _ => Err(UnknownEnumValue {
                kind: "sender_type",
                value,
            }),
        }
    }
}

/// Shape of a message: free text, an FAQ quick reply, or a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    QuickReply,
    Event,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::QuickReply => "quick_reply",
            MessageKind::Event => "event",
        }
    }
}

impl TryFrom<String> for MessageKind {
    type Error = UnknownEnumValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "text" => Ok(MessageKind::Text),
            "quick_reply" => Ok(MessageKind::QuickReply),
            "event" => Ok(MessageKind::Event),
            _ => Err(UnknownEnumValue {
                kind: "message_kind",
                value,
            }),
        }
    }
}

/// Agent availability for *new* assignment consideration. Presence never
/// affects acceptance of messages into already-assigned conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPresence {
    Online,
    Offline,
}

impl AgentPresence {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentPresence::Online => "online",
            AgentPresence::Offline => "offline",
        }
    }
}

impl TryFrom<String> for AgentPresence {
    type Error = UnknownEnumValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "online" => Ok(AgentPresence::Online),
            "offline" => Ok(AgentPresence::Offline),
            _ => Err(UnknownEnumValue {
                kind: "agent_presence",
                value,
            }),
        }
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct ConversationRow {
    pub id: Uuid,
    pub customer_session_id: String,
    #[sqlx(try_from = "String")]
    pub status: ConversationStatus,
    pub assigned_agent_id: Option<Uuid>,
    pub requested_agent_at: Option<OffsetDateTime>,
    pub closed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    #[sqlx(try_from = "String")]
    pub sender_type: SenderType,
    pub sender_agent_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub kind: MessageKind,
    pub content: String,
    pub metadata: Option<JsonValue>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct AgentRow {
    pub id: Uuid,
    pub display_name: String,
    #[sqlx(try_from = "String")]
    pub presence: AgentPresence,
    pub max_active_chats: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Login account backing an agent identity.
#[derive(Debug, Clone, FromRow)]
pub struct AgentAccountRow {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub is_active: bool,
}

/// FAQ entry, consumed read-only by bot-reply generation.
#[derive(Debug, Clone, FromRow)]
pub struct FaqEntryRow {
    pub id: Uuid,
    pub slug: String,
    pub question: String,
    pub answer: String,
    pub display_order: i32,
    pub is_active: bool,
}

// =============================================================================
// Snapshot Payloads
// =============================================================================

/// Full conversation snapshot as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    pub id: Uuid,
    pub customer_session_id: String,
    pub status: ConversationStatus,
    pub assigned_agent_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub requested_agent_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub closed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&ConversationRow> for ConversationSnapshot {
    fn from(row: &ConversationRow) -> Self {
        Self {
            id: row.id,
            customer_session_id: row.customer_session_id.clone(),
            status: row.status,
            assigned_agent_id: row.assigned_agent_id,
            requested_agent_at: row.requested_agent_at,
            closed_at: row.closed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Full message snapshot as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_type: SenderType,
    pub sender_agent_id: Option<Uuid>,
    pub kind: MessageKind,
    pub content: String,
    pub metadata: Option<JsonValue>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&MessageRow> for MessageSnapshot {
    fn from(row: &MessageRow) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_type: row.sender_type,
            sender_agent_id: row.sender_agent_id,
            kind: row.kind,
            content: row.content.clone(),
            metadata: row.metadata.clone(),
            created_at: row.created_at,
        }
    }
}

/// Full agent snapshot as served to clients. Password material never leaves
/// the accounts table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: Uuid,
    pub display_name: String,
    pub presence: AgentPresence,
    pub max_active_chats: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&AgentRow> for AgentSnapshot {
    fn from(row: &AgentRow) -> Self {
        Self {
            id: row.id,
            display_name: row.display_name.clone(),
            presence: row.presence,
            max_active_chats: row.max_active_chats,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Quick question offered to customers in automated mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickQuestion {
    pub slug: String,
    pub question: String,
}

impl From<&FaqEntryRow> for QuickQuestion {
    fn from(row: &FaqEntryRow) -> Self {
        Self {
            slug: row.slug.clone(),
            question: row.question.clone(),
        }
    }
}
