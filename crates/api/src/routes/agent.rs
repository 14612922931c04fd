//! Agent-facing dashboard routes
//!
//! Registration/login, presence, the conversation workspace (assigned plus
//! waiting queue), sending replies, and closing conversations.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use supportdesk_shared::{
    AgentPresence, AgentRow, AgentSnapshot, ConversationRow, ConversationSnapshot, MessageKind,
    MessageSnapshot, SenderType,
};

use crate::{
    auth::{hash_password, validate_password_strength, verify_password, AuthAgent},
    error::{ApiError, ApiResult},
    lifecycle::{ConversationLifecycle, TransitionAction},
    routes::customer::{
        insert_message, list_messages, publish_conversation_updated, publish_message,
        touch_conversation, validate_content,
    },
    state::AppState,
    websocket::{agent_queue_channel, conversation_channel, ServerEvent, AGENT_PRESENCE_CHANNEL},
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub display_name: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_max_active_chats")]
    pub max_active_chats: i32,
    #[serde(default = "default_start_online")]
    pub start_online: bool,
}

fn default_max_active_chats() -> i32 {
    3
}

fn default_start_online() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AgentSessionResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub agent: AgentSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct SetPresenceRequest {
    pub presence: AgentPresence,
}

#[derive(Debug, Deserialize)]
pub struct ListConversationsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    pub items: Vec<ConversationSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct ConversationMessagesResponse {
    pub conversation: ConversationSnapshot,
    pub messages: Vec<MessageSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct SendAgentMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct AgentMessageResponse {
    pub conversation: ConversationSnapshot,
    pub message: MessageSnapshot,
}

#[derive(Debug, Serialize)]
pub struct CloseConversationResponse {
    pub conversation: ConversationSnapshot,
    pub system_message: Option<MessageSnapshot>,
}

/// Workspace filter over conversation status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkspaceFilter {
    Active,
    Waiting,
    Closed,
    All,
}

impl WorkspaceFilter {
    fn parse(raw: Option<&str>) -> ApiResult<Self> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(WorkspaceFilter::All),
            Some("active") => Ok(WorkspaceFilter::Active),
            Some("waiting") => Ok(WorkspaceFilter::Waiting),
            Some("closed") => Ok(WorkspaceFilter::Closed),
            Some("all") => Ok(WorkspaceFilter::All),
            Some(other) => Err(ApiError::Validation(format!(
                "Unknown status filter '{other}'"
            ))),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Register a new agent with a login account.
///
/// Gated by `ENABLE_AGENT_REGISTRATION`; closed deployments provision
/// accounts out of band and expose login only.
pub async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<RegisterAgentRequest>,
) -> ApiResult<Json<AgentSnapshot>> {
    if !state.config.enable_agent_registration {
        return Err(ApiError::Forbidden);
    }

    let display_name = req.display_name.trim();
    if display_name.len() < 2 || display_name.len() > 120 {
        return Err(ApiError::Validation(
            "Display name must be between 2 and 120 characters".to_string(),
        ));
    }

    let username = req.username.trim().to_lowercase();
    if username.is_empty() || username.len() > 120 {
        return Err(ApiError::Validation(
            "Username must be between 1 and 120 characters".to_string(),
        ));
    }

    if !(1..=20).contains(&req.max_active_chats) {
        return Err(ApiError::Validation(
            "max_active_chats must be between 1 and 20".to_string(),
        ));
    }

    validate_password_strength(&req.password)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    let password_hash = hash_password(&req.password).map_err(|e| {
        tracing::error!(error = %e, "Failed to hash password");
        ApiError::Internal
    })?;

    let presence = if req.start_online {
        AgentPresence::Online
    } else {
        AgentPresence::Offline
    };

    let mut tx = state.pool.begin().await?;

    let agent: AgentRow = sqlx::query_as(
        r#"
        INSERT INTO agents (display_name, presence, max_active_chats)
        VALUES ($1, $2::agent_presence, $3)
        RETURNING id, display_name, presence::text AS presence, max_active_chats,
                  created_at, updated_at
        "#,
    )
    .bind(display_name)
    .bind(presence.as_str())
    .bind(req.max_active_chats)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO agent_accounts (agent_id, username, password_hash)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(agent.id)
    .bind(&username)
    .bind(&password_hash)
    .execute(&mut *tx)
    .await
    .map_err(|e| match ApiError::from(e) {
        ApiError::Conflict(_) => ApiError::Conflict("Username already taken".to_string()),
        other => other,
    })?;

    tx.commit().await?;

    tracing::info!(agent_id = %agent.id, "Agent registered");

    publish_presence_changed(&state, &agent).await;

    Ok(Json(AgentSnapshot::from(&agent)))
}

/// Exchange username/password for a bearer token
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AgentSessionResponse>> {
    let username = req.username.trim().to_lowercase();
    if username.is_empty() {
        return Err(ApiError::InvalidCredentials);
    }

    let account: Option<(Uuid, Uuid, String, bool)> = sqlx::query_as(
        "SELECT id, agent_id, password_hash, is_active FROM agent_accounts WHERE username = $1",
    )
    .bind(&username)
    .fetch_optional(&state.pool)
    .await?;

    // Same rejection for every failure path so usernames are not probeable.
    let Some((account_id, agent_id, password_hash, is_active)) = account else {
        return Err(ApiError::InvalidCredentials);
    };
    if !is_active {
        return Err(ApiError::InvalidCredentials);
    }
    let password_ok = verify_password(&req.password, &password_hash).unwrap_or(false);
    if !password_ok {
        return Err(ApiError::InvalidCredentials);
    }

    let agent = fetch_agent(&state, agent_id).await?;

    let (access_token, expires_at) = state
        .jwt
        .generate_token(account_id, agent_id)
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to issue agent token");
            ApiError::Internal
        })?;

    tracing::info!(agent_id = %agent_id, "Agent logged in");

    Ok(Json(AgentSessionResponse {
        access_token,
        token_type: "bearer".to_string(),
        expires_at,
        agent: AgentSnapshot::from(&agent),
    }))
}

/// Current agent profile
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAgent>,
) -> ApiResult<Json<AgentSnapshot>> {
    let agent = fetch_agent(&state, auth.agent_id).await?;
    Ok(Json(AgentSnapshot::from(&agent)))
}

/// Explicitly set presence (the realtime connection lifecycle also drives it)
pub async fn set_presence(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAgent>,
    Json(req): Json<SetPresenceRequest>,
) -> ApiResult<Json<AgentSnapshot>> {
    let agent: AgentRow = sqlx::query_as(
        r#"
        UPDATE agents
        SET presence = $2::agent_presence, updated_at = NOW()
        WHERE id = $1
        RETURNING id, display_name, presence::text AS presence, max_active_chats,
                  created_at, updated_at
        "#,
    )
    .bind(auth.agent_id)
    .bind(req.presence.as_str())
    .fetch_optional(&state.pool)
    .await?
    .ok_or(ApiError::NotFound)?;

    tracing::info!(agent_id = %agent.id, presence = req.presence.as_str(), "Agent presence set");

    publish_presence_changed(&state, &agent).await;

    Ok(Json(AgentSnapshot::from(&agent)))
}

/// List the agent's workspace: conversations assigned to them plus the
/// unassigned waiting queue (and closed history).
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAgent>,
    Query(query): Query<ListConversationsQuery>,
) -> ApiResult<Json<ConversationListResponse>> {
    let filter = WorkspaceFilter::parse(query.status.as_deref())?;

    const COLUMNS: &str = "id, customer_session_id, status::text AS status, assigned_agent_id, \
                           requested_agent_at, closed_at, created_at, updated_at";

    let conversations: Vec<ConversationRow> = match filter {
        WorkspaceFilter::Active => {
            sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM conversations \
                 WHERE status = 'agent' AND assigned_agent_id = $1 \
                 ORDER BY updated_at DESC"
            ))
            .bind(auth.agent_id)
            .fetch_all(&state.pool)
            .await?
        }
        WorkspaceFilter::Waiting => {
            sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM conversations \
                 WHERE status = 'agent' AND assigned_agent_id IS NULL \
                 ORDER BY requested_agent_at ASC NULLS LAST"
            ))
            .fetch_all(&state.pool)
            .await?
        }
        WorkspaceFilter::Closed => {
            sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM conversations \
                 WHERE status = 'closed' \
                 ORDER BY closed_at DESC NULLS LAST"
            ))
            .fetch_all(&state.pool)
            .await?
        }
        WorkspaceFilter::All => {
            sqlx::query_as(&format!(
                "SELECT {COLUMNS} FROM conversations \
                 WHERE (status = 'agent' AND (assigned_agent_id = $1 OR assigned_agent_id IS NULL)) \
                    OR status = 'closed' \
                 ORDER BY updated_at DESC"
            ))
            .bind(auth.agent_id)
            .fetch_all(&state.pool)
            .await?
        }
    };

    Ok(Json(ConversationListResponse {
        items: conversations
            .iter()
            .map(ConversationSnapshot::from)
            .collect(),
    }))
}

/// Message history for a conversation the agent may view
pub async fn get_conversation_messages(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAgent>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<ConversationMessagesResponse>> {
    let conversation = fetch_conversation(&state, conversation_id).await?;
    ensure_agent_access(&conversation, auth.agent_id)?;

    let messages = list_messages(&state.pool, conversation.id).await?;

    Ok(Json(ConversationMessagesResponse {
        conversation: ConversationSnapshot::from(&conversation),
        messages: messages.iter().map(MessageSnapshot::from).collect(),
    }))
}

/// Send an agent reply into a conversation.
///
/// Sending into an unassigned queued conversation claims it; a
/// conversation held by another agent is rejected.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAgent>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendAgentMessageRequest>,
) -> ApiResult<Json<AgentMessageResponse>> {
    let content = validate_content(&req.content)?;

    let mut tx = state.pool.begin().await?;
    let conversation = lock_conversation(&mut tx, conversation_id).await?;
    ensure_agent_access(&conversation, auth.agent_id)?;

    if ConversationLifecycle::is_read_only(conversation.status) {
        return Err(ApiError::ConversationClosed);
    }
    if conversation.status != supportdesk_shared::ConversationStatus::Agent {
        return Err(ApiError::InvalidTransition(
            "agent replies require an escalated conversation".to_string(),
        ));
    }

    // Claim the waiting conversation under the row lock; two agents racing
    // for the same queued chat resolve deterministically.
    let claimed = conversation.assigned_agent_id.is_none();
    if claimed {
        sqlx::query(
            "UPDATE conversations SET assigned_agent_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(conversation.id)
        .bind(auth.agent_id)
        .execute(&mut *tx)
        .await?;
        tracing::info!(
            conversation_id = %conversation.id,
            agent_id = %auth.agent_id,
            "Agent claimed waiting conversation"
        );
    }

    let message = insert_message(
        &mut tx,
        conversation.id,
        SenderType::Agent,
        Some(auth.agent_id),
        MessageKind::Text,
        &content,
        Some(json!({"show_talk_to_agent": false})),
    )
    .await?;

    let conversation = touch_conversation(&mut tx, conversation.id).await?;
    let agent = if claimed {
        Some(fetch_agent_tx(&mut tx, auth.agent_id).await?)
    } else {
        None
    };
    tx.commit().await?;

    publish_message(&state, &message).await;
    publish_conversation_updated(&state, &conversation).await;
    if let Some(agent) = &agent {
        state
            .hub
            .publish(
                &[
                    conversation_channel(conversation.id),
                    agent_queue_channel(agent.id),
                ],
                ServerEvent::AgentAssigned {
                    conversation: ConversationSnapshot::from(&conversation),
                    agent: agent.into(),
                },
            )
            .await;
    }

    Ok(Json(AgentMessageResponse {
        conversation: ConversationSnapshot::from(&conversation),
        message: MessageSnapshot::from(&message),
    }))
}

/// Close a conversation.
///
/// Terminal and idempotent: closing an already-closed conversation returns
/// the current snapshot untouched. Closing from `automated` is an invalid
/// transition.
pub async fn close_conversation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthAgent>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<CloseConversationResponse>> {
    let mut tx = state.pool.begin().await?;
    let conversation = lock_conversation(&mut tx, conversation_id).await?;
    ensure_agent_access(&conversation, auth.agent_id)?;

    let transition =
        ConversationLifecycle::transition(conversation.status, TransitionAction::CloseByAgent)
            .map_err(|e| ApiError::InvalidTransition(e.to_string()))?;

    if !transition.changed() {
        return Ok(Json(CloseConversationResponse {
            conversation: ConversationSnapshot::from(&conversation),
            system_message: None,
        }));
    }

    let agent = fetch_agent_tx(&mut tx, auth.agent_id).await?;

    // Assignment linkage is cleared at close; who closed it is retained on
    // the message timeline.
    sqlx::query(
        r#"
        UPDATE conversations
        SET status = 'closed'::conversation_status,
            closed_at = NOW(),
            assigned_agent_id = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(conversation.id)
    .execute(&mut *tx)
    .await?;

    let system_message = insert_message(
        &mut tx,
        conversation.id,
        SenderType::System,
        None,
        MessageKind::Event,
        &format!("{} closed the chat.", agent.display_name),
        Some(json!({"closed_by_agent_id": agent.id})),
    )
    .await?;

    let conversation = touch_conversation(&mut tx, conversation.id).await?;
    tx.commit().await?;

    tracing::info!(
        conversation_id = %conversation.id,
        agent_id = %auth.agent_id,
        "Conversation closed by agent"
    );

    // The closing agent's queue channel still gets the terminal events even
    // though the row no longer carries the assignment.
    let channels = vec![
        conversation_channel(conversation.id),
        agent_queue_channel(auth.agent_id),
    ];

    publish_message(&state, &system_message).await;
    state
        .hub
        .publish(
            &channels,
            ServerEvent::ConversationUpdated {
                conversation: ConversationSnapshot::from(&conversation),
            },
        )
        .await;
    state
        .hub
        .publish(
            &channels,
            ServerEvent::ChatClosed {
                conversation: ConversationSnapshot::from(&conversation),
            },
        )
        .await;

    Ok(Json(CloseConversationResponse {
        conversation: ConversationSnapshot::from(&conversation),
        system_message: Some(MessageSnapshot::from(&system_message)),
    }))
}

// =============================================================================
// Helpers
// =============================================================================

/// A conversation held by another agent is off limits; unassigned and
/// own-assigned conversations are viewable.
fn ensure_agent_access(conversation: &ConversationRow, agent_id: Uuid) -> ApiResult<()> {
    match conversation.assigned_agent_id {
        Some(assigned) if assigned != agent_id => Err(ApiError::Forbidden),
        _ => Ok(()),
    }
}

async fn fetch_agent(state: &AppState, agent_id: Uuid) -> ApiResult<AgentRow> {
    let agent: Option<AgentRow> = sqlx::query_as(
        r#"
        SELECT id, display_name, presence::text AS presence, max_active_chats,
               created_at, updated_at
        FROM agents
        WHERE id = $1
        "#,
    )
    .bind(agent_id)
    .fetch_optional(&state.pool)
    .await?;

    agent.ok_or(ApiError::NotFound)
}

async fn fetch_agent_tx(
    tx: &mut Transaction<'_, Postgres>,
    agent_id: Uuid,
) -> ApiResult<AgentRow> {
    let agent: Option<AgentRow> = sqlx::query_as(
        r#"
        SELECT id, display_name, presence::text AS presence, max_active_chats,
               created_at, updated_at
        FROM agents
        WHERE id = $1
        "#,
    )
    .bind(agent_id)
    .fetch_optional(&mut **tx)
    .await?;

    agent.ok_or(ApiError::NotFound)
}

async fn fetch_conversation(state: &AppState, conversation_id: Uuid) -> ApiResult<ConversationRow> {
    let conversation: Option<ConversationRow> = sqlx::query_as(
        r#"
        SELECT id, customer_session_id, status::text AS status, assigned_agent_id,
               requested_agent_at, closed_at, created_at, updated_at
        FROM conversations
        WHERE id = $1
        "#,
    )
    .bind(conversation_id)
    .fetch_optional(&state.pool)
    .await?;

    conversation.ok_or(ApiError::NotFound)
}

async fn lock_conversation(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: Uuid,
) -> ApiResult<ConversationRow> {
    let conversation: Option<ConversationRow> = sqlx::query_as(
        r#"
        SELECT id, customer_session_id, status::text AS status, assigned_agent_id,
               requested_agent_at, closed_at, created_at, updated_at
        FROM conversations
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(conversation_id)
    .fetch_optional(&mut **tx)
    .await?;

    conversation.ok_or(ApiError::NotFound)
}

async fn publish_presence_changed(state: &AppState, agent: &AgentRow) {
    state
        .hub
        .publish(
            &[
                AGENT_PRESENCE_CHANNEL.to_string(),
                agent_queue_channel(agent.id),
            ],
            ServerEvent::AgentPresenceChanged {
                agent: agent.into(),
            },
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn conversation_with_assignment(assigned: Option<Uuid>) -> ConversationRow {
        let now = OffsetDateTime::now_utc();
        ConversationRow {
            id: Uuid::new_v4(),
            customer_session_id: "sess-1".to_string(),
            status: supportdesk_shared::ConversationStatus::Agent,
            assigned_agent_id: assigned,
            requested_agent_at: Some(now),
            closed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_unassigned_conversation_is_accessible() {
        let conversation = conversation_with_assignment(None);
        assert!(ensure_agent_access(&conversation, Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_own_assignment_is_accessible() {
        let agent_id = Uuid::new_v4();
        let conversation = conversation_with_assignment(Some(agent_id));
        assert!(ensure_agent_access(&conversation, agent_id).is_ok());
    }

    #[test]
    fn test_foreign_assignment_is_rejected() {
        let conversation = conversation_with_assignment(Some(Uuid::new_v4()));
        assert!(matches!(
            ensure_agent_access(&conversation, Uuid::new_v4()),
            Err(ApiError::Forbidden)
        ));
    }

    #[test]
    fn test_workspace_filter_parsing() {
        assert_eq!(WorkspaceFilter::parse(None).unwrap(), WorkspaceFilter::All);
        assert_eq!(
            WorkspaceFilter::parse(Some("waiting")).unwrap(),
            WorkspaceFilter::Waiting
        );
        assert_eq!(
            WorkspaceFilter::parse(Some("active")).unwrap(),
            WorkspaceFilter::Active
        );
        assert!(WorkspaceFilter::parse(Some("archived")).is_err());
    }
}
