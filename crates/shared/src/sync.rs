//! Client-side state reconciliation
//!
//! Realtime payloads carry full entity snapshots. A client keeps consistent
//! by merging each incoming snapshot into its local cache by identity,
//! always overwriting the whole entity — never applying partial patches.
//! The same merge runs against a resync fetch after (re)connecting, so a
//! gap in live delivery is reconciled by identical code.

use std::collections::HashMap;
use uuid::Uuid;

use crate::types::{AgentSnapshot, ConversationSnapshot, MessageSnapshot};

/// Local cache of authoritative server state, merged by identity.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    conversations: HashMap<Uuid, ConversationSnapshot>,
    agents: HashMap<Uuid, AgentSnapshot>,
    messages: HashMap<Uuid, Vec<MessageSnapshot>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a conversation snapshot, overwriting any existing entry.
    pub fn merge_conversation(&mut self, snapshot: ConversationSnapshot) {
        self.conversations.insert(snapshot.id, snapshot);
    }

    /// Merge an agent snapshot, overwriting any existing entry.
    pub fn merge_agent(&mut self, snapshot: AgentSnapshot) {
        self.agents.insert(snapshot.id, snapshot);
    }

    /// Merge a message into its conversation's timeline. Duplicate delivery
    /// (same id) overwrites in place; otherwise the message is inserted at
    /// its `(created_at, id)` position.
    pub fn merge_message(&mut self, snapshot: MessageSnapshot) {
        let timeline = self.messages.entry(snapshot.conversation_id).or_default();

        if let Some(existing) = timeline.iter_mut().find(|m| m.id == snapshot.id) {
            *existing = snapshot;
            return;
        }

        let position = timeline
            .iter()
            .position(|m| (m.created_at, m.id) > (snapshot.created_at, snapshot.id))
            .unwrap_or(timeline.len());
        timeline.insert(position, snapshot);
    }

    /// Replace a conversation's entire timeline with a resync fetch result.
    pub fn replace_messages(&mut self, conversation_id: Uuid, mut snapshots: Vec<MessageSnapshot>) {
        snapshots.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        self.messages.insert(conversation_id, snapshots);
    }

    pub fn conversation(&self, id: &Uuid) -> Option<&ConversationSnapshot> {
        self.conversations.get(id)
    }

    pub fn agent(&self, id: &Uuid) -> Option<&AgentSnapshot> {
        self.agents.get(id)
    }

    pub fn messages(&self, conversation_id: &Uuid) -> &[MessageSnapshot] {
        self.messages
            .get(conversation_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationStatus, MessageKind, SenderType};
    use time::{Duration, OffsetDateTime};

    fn conversation(id: Uuid, status: ConversationStatus) -> ConversationSnapshot {
        let now = OffsetDateTime::now_utc();
        ConversationSnapshot {
            id,
            customer_session_id: "sess-1".to_string(),
            status,
            assigned_agent_id: None,
            requested_agent_at: None,
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn message(conversation_id: Uuid, at: OffsetDateTime) -> MessageSnapshot {
        MessageSnapshot {
            id: Uuid::new_v4(),
            conversation_id,
            sender_type: SenderType::Customer,
            sender_agent_id: None,
            kind: MessageKind::Text,
            content: "hello".to_string(),
            metadata: None,
            created_at: at,
        }
    }

    #[test]
    fn test_conversation_merge_overwrites() {
        let mut cache = SnapshotCache::new();
        let id = Uuid::new_v4();

        cache.merge_conversation(conversation(id, ConversationStatus::Automated));
        cache.merge_conversation(conversation(id, ConversationStatus::Agent));

        assert_eq!(
            cache.conversation(&id).map(|c| c.status),
            Some(ConversationStatus::Agent)
        );
    }

    #[test]
    fn test_messages_keep_creation_order() {
        let mut cache = SnapshotCache::new();
        let conversation_id = Uuid::new_v4();
        let base = OffsetDateTime::now_utc();

        let m2 = message(conversation_id, base + Duration::seconds(2));
        let m1 = message(conversation_id, base + Duration::seconds(1));

        // Delivered out of order; the cache re-establishes timeline order.
        cache.merge_message(m2.clone());
        cache.merge_message(m1.clone());

        let timeline = cache.messages(&conversation_id);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].id, m1.id);
        assert_eq!(timeline[1].id, m2.id);
    }

    #[test]
    fn test_duplicate_message_delivery_is_idempotent() {
        let mut cache = SnapshotCache::new();
        let conversation_id = Uuid::new_v4();
        let m = message(conversation_id, OffsetDateTime::now_utc());

        cache.merge_message(m.clone());
        cache.merge_message(m.clone());

        assert_eq!(cache.messages(&conversation_id).len(), 1);
    }

    #[test]
    fn test_resync_replaces_timeline() {
        let mut cache = SnapshotCache::new();
        let conversation_id = Uuid::new_v4();
        let base = OffsetDateTime::now_utc();

        cache.merge_message(message(conversation_id, base));

        let resynced = vec![
            message(conversation_id, base + Duration::seconds(3)),
            message(conversation_id, base + Duration::seconds(1)),
        ];
        cache.replace_messages(conversation_id, resynced);

        let timeline = cache.messages(&conversation_id);
        assert_eq!(timeline.len(), 2);
        assert!(timeline[0].created_at < timeline[1].created_at);
    }
}
