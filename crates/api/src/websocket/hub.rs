//! In-process channel hub for realtime fanout
//!
//! Fanout-only: no durable queue. A connection that is down at emission
//! time misses the push; the store remains the source of truth and clients
//! resync on reconnect. The hub's only delivery guarantee is per-connection
//! ordering, which the per-connection mpsc provides.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::{EventFrame, ServerEvent};

#[derive(Default)]
struct HubInner {
    /// channel name -> subscribed connections
    channel_subscribers: HashMap<String, Vec<Arc<Connection>>>,
    /// connection id -> channels it is subscribed to
    connection_channels: HashMap<Uuid, HashSet<String>>,
}

/// Channel hub shared across all connections
#[derive(Clone, Default)]
pub struct ChannelHub {
    inner: Arc<RwLock<HubInner>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a channel
    pub async fn subscribe(&self, conn: &Arc<Connection>, channel: &str) {
        let mut inner = self.inner.write().await;

        let subscribers = inner
            .channel_subscribers
            .entry(channel.to_string())
            .or_default();
        if !subscribers
            .iter()
            .any(|c| c.connection_id == conn.connection_id)
        {
            subscribers.push(Arc::clone(conn));
        }

        inner
            .connection_channels
            .entry(conn.connection_id)
            .or_default()
            .insert(channel.to_string());

        tracing::debug!(
            connection_id = %conn.connection_id,
            channel = %channel,
            "Connection subscribed to channel"
        );
    }

    /// Unsubscribe a connection from a channel
    pub async fn unsubscribe(&self, connection_id: &Uuid, channel: &str) {
        let mut inner = self.inner.write().await;

        if let Some(subscribers) = inner.channel_subscribers.get_mut(channel) {
            subscribers.retain(|c| c.connection_id != *connection_id);
            if subscribers.is_empty() {
                inner.channel_subscribers.remove(channel);
            }
        }

        if let Some(channels) = inner.connection_channels.get_mut(connection_id) {
            channels.remove(channel);
            if channels.is_empty() {
                inner.connection_channels.remove(connection_id);
            }
        }
    }

    /// Remove a connection from every channel it is subscribed to
    pub async fn remove_connection(&self, connection_id: &Uuid) {
        let mut inner = self.inner.write().await;

        let channels = inner
            .connection_channels
            .remove(connection_id)
            .unwrap_or_default();
        for channel in &channels {
            if let Some(subscribers) = inner.channel_subscribers.get_mut(channel) {
                subscribers.retain(|c| c.connection_id != *connection_id);
                if subscribers.is_empty() {
                    inner.channel_subscribers.remove(channel);
                }
            }
        }

        if !channels.is_empty() {
            tracing::debug!(
                connection_id = %connection_id,
                channel_count = channels.len(),
                "Removed connection from channels"
            );
        }
    }

    /// Publish an event to every subscriber of the given channels.
    ///
    /// Duplicate channels are collapsed; a connection subscribed to more
    /// than one of the channels receives one frame per channel it follows.
    /// Dead connections are dropped silently — fanout is best-effort
    /// notification, never part of the committed state change.
    pub async fn publish(&self, channels: &[String], event: ServerEvent) {
        let mut seen = HashSet::new();
        let unique: Vec<&String> = channels
            .iter()
            .filter(|channel| !channel.is_empty() && seen.insert(channel.as_str()))
            .collect();
        if unique.is_empty() {
            return;
        }

        let recipients: Vec<(String, Vec<Arc<Connection>>)> = {
            let inner = self.inner.read().await;
            unique
                .into_iter()
                .map(|channel| {
                    (
                        channel.clone(),
                        inner
                            .channel_subscribers
                            .get(channel)
                            .cloned()
                            .unwrap_or_default(),
                    )
                })
                .collect()
        };

        let mut stale: Vec<(Uuid, String)> = Vec::new();
        for (channel, subscribers) in recipients {
            if subscribers.is_empty() {
                continue;
            }

            let frame = EventFrame::new(event.clone(), Some(channel.clone()));
            let mut delivered = 0usize;
            for conn in &subscribers {
                match conn.send(frame.clone()) {
                    Ok(()) => delivered += 1,
                    Err(_) => stale.push((conn.connection_id, channel.clone())),
                }
            }

            tracing::debug!(
                channel = %channel,
                recipients = delivered,
                failed = subscribers.len() - delivered,
                "Broadcast event to channel"
            );
        }

        for (connection_id, channel) in stale {
            self.unsubscribe(&connection_id, &channel).await;
        }
    }

    /// Whether a connection is currently subscribed to a channel
    pub async fn is_subscribed(&self, connection_id: &Uuid, channel: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .connection_channels
            .get(connection_id)
            .map(|channels| channels.contains(channel))
            .unwrap_or(false)
    }

    /// Number of live subscribers on a channel
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        let inner = self.inner.read().await;
        inner
            .channel_subscribers
            .get(channel)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
