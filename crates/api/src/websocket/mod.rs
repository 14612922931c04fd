//! Realtime fanout for chat events
//!
//! Customers and agent dashboards hold a WebSocket to receive lifecycle and
//! message events as they are committed. The hub is fanout-only: durable
//! state lives in the store, and clients resync over HTTP after every
//! (re)connect.

pub mod connection;
pub mod events;
pub mod handler;
pub mod hub;

pub use connection::{Connection, ConnectionRole};
pub use events::{
    agent_queue_channel, conversation_channel, ClientEvent, EventFrame, ServerEvent,
    AGENT_PRESENCE_CHANNEL,
};
pub use handler::ws_handler;
pub use hub::ChannelHub;
