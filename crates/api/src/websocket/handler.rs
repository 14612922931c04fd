//! WebSocket handler for Axum
//!
//! Upgrades connections, authenticates role + scope from query parameters,
//! routes control frames, and drives agent presence from the connection
//! lifecycle.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::Response,
};
use futures::{stream::StreamExt, SinkExt};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use supportdesk_shared::{AgentPresence, AgentRow, AgentSnapshot};

use crate::auth::authenticate_agent_token;
use crate::state::AppState;

use super::{
    connection::{Connection, ConnectionRole},
    events::{
        agent_queue_channel, conversation_channel, ClientEvent, EventFrame, ServerEvent,
        AGENT_PRESENCE_CHANNEL,
    },
};

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    role: String,
    conversation_id: Option<Uuid>,
    customer_session_id: Option<String>,
    access_token: Option<String>,
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
///
/// Role and scope are authenticated from query parameters before the
/// upgrade; a rejected connect never reaches the socket loop.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WebSocketQuery>,
) -> Result<Response, StatusCode> {
    match params.role.trim().to_lowercase().as_str() {
        "customer" => {
            let conversation_id = params.conversation_id.ok_or(StatusCode::BAD_REQUEST)?;
            let session_id = params
                .customer_session_id
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or(StatusCode::BAD_REQUEST)?
                .to_string();

            let owns = customer_owns_conversation(&state.pool, conversation_id, &session_id)
                .await
                .map_err(|e| {
                    tracing::error!(error = ?e, "WebSocket auth: database error");
                    StatusCode::INTERNAL_SERVER_ERROR
                })?;
            if !owns {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    "Customer WebSocket rejected: conversation not owned by session"
                );
                return Err(StatusCode::FORBIDDEN);
            }

            let role = ConnectionRole::Customer {
                customer_session_id: session_id,
            };
            Ok(ws.on_upgrade(move |socket| {
                handle_socket(socket, role, Some(conversation_id), state)
            }))
        }
        "agent" => {
            let token = params
                .access_token
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or(StatusCode::UNAUTHORIZED)?;

            let auth_agent = authenticate_agent_token(&state.auth_state(), token)
                .await
                .map_err(|e| {
                    tracing::warn!(error = %e, "Agent WebSocket rejected: invalid token");
                    StatusCode::UNAUTHORIZED
                })?;

            if let Some(conversation_id) = params.conversation_id {
                let accessible =
                    agent_can_view_conversation(&state.pool, auth_agent.agent_id, conversation_id)
                        .await
                        .map_err(|e| {
                            tracing::error!(error = ?e, "WebSocket auth: database error");
                            StatusCode::INTERNAL_SERVER_ERROR
                        })?;
                if !accessible {
                    return Err(StatusCode::FORBIDDEN);
                }
            }

            let role = ConnectionRole::Agent {
                agent_id: auth_agent.agent_id,
            };
            Ok(ws.on_upgrade(move |socket| {
                handle_socket(socket, role, params.conversation_id, state)
            }))
        }
        _ => Err(StatusCode::BAD_REQUEST),
    }
}

/// Handle one established WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    role: ConnectionRole,
    conversation_id: Option<Uuid>,
    state: AppState,
) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<EventFrame>();
    let conn = Arc::new(Connection::new(role, tx));
    let connection_id = conn.connection_id;

    // Initial subscription scope. Customers are pinned to exactly one
    // conversation channel; agents get their queue plus presence.
    let mut initial_channels: Vec<String> = Vec::new();
    match &conn.role {
        ConnectionRole::Customer { .. } => {
            if let Some(conversation_id) = conversation_id {
                initial_channels.push(conversation_channel(conversation_id));
            }
        }
        ConnectionRole::Agent { agent_id } => {
            initial_channels.push(agent_queue_channel(*agent_id));
            initial_channels.push(AGENT_PRESENCE_CHANNEL.to_string());
            if let Some(conversation_id) = conversation_id {
                initial_channels.push(conversation_channel(conversation_id));
            }
        }
    }
    for channel in &initial_channels {
        state.hub.subscribe(&conn, channel).await;
    }

    // The connected frame doubles as the resync trigger: clients re-fetch
    // authoritative state whenever they see it.
    let _ = conn.send(EventFrame::new(
        ServerEvent::Connected {
            role: conn.role.as_str().to_string(),
            channels: initial_channels,
        },
        None,
    ));

    tracing::info!(
        connection_id = %connection_id,
        role = conn.role.as_str(),
        "WebSocket connection established"
    );

    if let Some(agent_id) = conn.role.agent_id() {
        set_agent_presence_and_broadcast(&state, agent_id, AgentPresence::Online).await;
    }

    // Push frames from the hub out to the socket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match serde_json::to_string(&frame) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket frame");
                }
            }
        }
    });

    // Handle incoming control frames
    while let Some(msg) = receiver.next().await {
        let Ok(msg) = msg else { break };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    handle_client_event(event, &conn, &state).await;
                }
                Err(e) => {
                    tracing::warn!(error = ?e, "Failed to parse client event");
                    let _ = conn.send(EventFrame::new(
                        ServerEvent::Error {
                            detail: "Invalid event format".to_string(),
                        },
                        None,
                    ));
                }
            },
            Message::Close(_) => {
                tracing::info!(connection_id = %connection_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            _ => {} // Ignore binary messages
        }
    }

    // Cleanup on disconnect
    tracing::info!(connection_id = %connection_id, "WebSocket connection closing");
    state.hub.remove_connection(&connection_id).await;

    if let Some(agent_id) = conn.role.agent_id() {
        // Only the agent's last connection flips presence; a second
        // dashboard tab closing must not mark them offline.
        let remaining = state
            .hub
            .subscriber_count(&agent_queue_channel(agent_id))
            .await;
        if remaining == 0 {
            set_agent_presence_and_broadcast(&state, agent_id, AgentPresence::Offline).await;
        }
    }

    send_task.abort();
}

/// Handle one parsed control frame
async fn handle_client_event(event: ClientEvent, conn: &Arc<Connection>, state: &AppState) {
    use ClientEvent::*;

    // Customers are bound to their single conversation channel; only the
    // heartbeat is accepted from them.
    let agent_id = match (&event, conn.role.agent_id()) {
        (Ping, _) => {
            let _ = conn.send(EventFrame::new(ServerEvent::Pong, None));
            return;
        }
        (_, Some(agent_id)) => agent_id,
        (_, None) => {
            let _ = conn.send(EventFrame::new(
                ServerEvent::Error {
                    detail: "Unsupported action for current role".to_string(),
                },
                None,
            ));
            return;
        }
    };

    match event {
        Ping => {}

        SubscribeConversation { conversation_id } => {
            match agent_can_view_conversation(&state.pool, agent_id, conversation_id).await {
                Ok(true) => {
                    let channel = conversation_channel(conversation_id);
                    state.hub.subscribe(conn, &channel).await;
                    let _ = conn.send(EventFrame::new(ServerEvent::Subscribed { channel }, None));
                }
                Ok(false) => {
                    let _ = conn.send(EventFrame::new(
                        ServerEvent::Error {
                            detail: "Conversation access denied".to_string(),
                        },
                        None,
                    ));
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to verify conversation access");
                    let _ = conn.send(EventFrame::new(
                        ServerEvent::Error {
                            detail: "Failed to verify access".to_string(),
                        },
                        None,
                    ));
                }
            }
        }

        UnsubscribeConversation { conversation_id } => {
            let channel = conversation_channel(conversation_id);
            state.hub.unsubscribe(&conn.connection_id, &channel).await;
            let _ = conn.send(EventFrame::new(ServerEvent::Unsubscribed { channel }, None));
        }

        TypingStart { conversation_id } | TypingStop { conversation_id } => {
            let is_typing = matches!(event, TypingStart { .. });
            let channel = conversation_channel(conversation_id);

            // Subscription implies verified access; typing is ephemeral and
            // never touches the store.
            if !state.hub.is_subscribed(&conn.connection_id, &channel).await {
                let _ = conn.send(EventFrame::new(
                    ServerEvent::Error {
                        detail: "Not subscribed to conversation".to_string(),
                    },
                    None,
                ));
                return;
            }

            state
                .hub
                .publish(
                    &[channel],
                    ServerEvent::AgentTyping {
                        conversation_id,
                        agent_id,
                        is_typing,
                    },
                )
                .await;
        }
    }
}

// =============================================================================
// Database Helper Functions
// =============================================================================

/// Verify a conversation belongs to the given customer session
async fn customer_owns_conversation(
    pool: &PgPool,
    conversation_id: Uuid,
    customer_session_id: &str,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
          SELECT 1 FROM conversations
          WHERE id = $1 AND customer_session_id = $2
        )
        "#,
    )
    .bind(conversation_id)
    .bind(customer_session_id)
    .fetch_one(pool)
    .await
}

/// Agents may view conversations assigned to them and unassigned queued
/// ones; a conversation held by another agent is off limits.
async fn agent_can_view_conversation(
    pool: &PgPool,
    agent_id: Uuid,
    conversation_id: Uuid,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
          SELECT 1 FROM conversations
          WHERE id = $1
            AND (assigned_agent_id IS NULL OR assigned_agent_id = $2)
        )
        "#,
    )
    .bind(conversation_id)
    .bind(agent_id)
    .fetch_one(pool)
    .await
}

/// Update agent presence when it actually changes and broadcast the new
/// snapshot to the presence and queue channels.
async fn set_agent_presence_and_broadcast(
    state: &AppState,
    agent_id: Uuid,
    presence: AgentPresence,
) {
    let updated: Result<Option<AgentRow>, sqlx::Error> = sqlx::query_as(
        r#"
        UPDATE agents
        SET presence = $2::agent_presence, updated_at = NOW()
        WHERE id = $1 AND presence IS DISTINCT FROM $2::agent_presence
        RETURNING id, display_name, presence::text AS presence, max_active_chats,
                  created_at, updated_at
        "#,
    )
    .bind(agent_id)
    .bind(presence.as_str())
    .fetch_optional(&state.pool)
    .await;

    match updated {
        Ok(Some(agent)) => {
            tracing::info!(agent_id = %agent_id, presence = presence.as_str(), "Agent presence updated");
            state
                .hub
                .publish(
                    &[
                        AGENT_PRESENCE_CHANNEL.to_string(),
                        agent_queue_channel(agent_id),
                    ],
                    ServerEvent::AgentPresenceChanged {
                        agent: AgentSnapshot::from(&agent),
                    },
                )
                .await;
        }
        Ok(None) => {} // Presence unchanged
        Err(e) => {
            tracing::error!(error = ?e, agent_id = %agent_id, "Failed to update agent presence");
        }
    }
}
