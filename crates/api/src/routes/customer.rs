//! Customer-facing chat routes
//!
//! This module provides the endpoints consumed by the chat widget: starting
//! or resuming a conversation, sending messages and FAQ quick replies,
//! escalating to a human agent, and reading history.
//!
//! Every conversation-scoped endpoint verifies the caller's `X-Session-Id`
//! against the conversation owner. Missing conversations and foreign
//! conversations are indistinguishable to the caller.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::{PgExecutor, Postgres, Transaction};
use uuid::Uuid;

use supportdesk_shared::{
    AgentRow, ConversationRow, ConversationSnapshot, ConversationStatus, FaqEntryRow, MessageKind,
    MessageRow, MessageSnapshot, QuickQuestion, RateLimitRule, SenderType, MAX_MESSAGE_LENGTH,
};

use crate::{
    assignment::AssignmentCoordinator,
    auth::require_session_id,
    error::{ApiError, ApiResult},
    lifecycle::{ConversationLifecycle, TransitionAction},
    state::AppState,
    websocket::{agent_queue_channel, conversation_channel, ServerEvent},
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct StartConversationRequest {
    pub customer_session_id: Option<String>,
    #[serde(default)]
    pub force_new: bool,
}

#[derive(Debug, Serialize)]
pub struct ConversationBootstrapResponse {
    pub conversation: ConversationSnapshot,
    pub messages: Vec<MessageSnapshot>,
    pub quick_questions: Vec<QuickQuestion>,
    pub show_talk_to_agent: bool,
}

#[derive(Debug, Serialize)]
pub struct ConversationMessagesResponse {
    pub conversation: ConversationSnapshot,
    pub messages: Vec<MessageSnapshot>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct QuickReplyRequest {
    pub faq_slug: String,
}

#[derive(Debug, Serialize)]
pub struct BotExchangeResponse {
    pub conversation: ConversationSnapshot,
    pub customer_message: MessageSnapshot,
    pub bot_message: Option<MessageSnapshot>,
    pub quick_questions: Vec<QuickQuestion>,
    pub show_talk_to_agent: bool,
}

#[derive(Debug, Serialize)]
pub struct EscalateResponse {
    pub conversation: ConversationSnapshot,
    pub customer_message: Option<MessageSnapshot>,
    pub system_message: Option<MessageSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct QuickQuestionsResponse {
    pub quick_questions: Vec<QuickQuestion>,
}

// =============================================================================
// Handlers
// =============================================================================

/// Start a new conversation or resume the session's most recent open one.
///
/// `force_new` always creates a fresh record; the prior conversation stays
/// untouched and independently resumable.
pub async fn start_conversation(
    State(state): State<AppState>,
    Json(req): Json<StartConversationRequest>,
) -> ApiResult<Json<ConversationBootstrapResponse>> {
    let session_id = resolve_session_id(req.customer_session_id);

    let mut conversation: Option<ConversationRow> = None;
    if !req.force_new {
        conversation = sqlx::query_as(
            r#"
            SELECT id, customer_session_id, status::text AS status, assigned_agent_id,
                   requested_agent_at, closed_at, created_at, updated_at
            FROM conversations
            WHERE customer_session_id = $1 AND status <> 'closed'
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(&session_id)
        .fetch_optional(&state.pool)
        .await?;
    }

    let conversation = match conversation {
        Some(conversation) => conversation,
        None => {
            let mut tx = state.pool.begin().await?;

            let conversation: ConversationRow = sqlx::query_as(
                r#"
                INSERT INTO conversations (customer_session_id)
                VALUES ($1)
                RETURNING id, customer_session_id, status::text AS status, assigned_agent_id,
                          requested_agent_at, closed_at, created_at, updated_at
                "#,
            )
            .bind(&session_id)
            .fetch_one(&mut *tx)
            .await?;

            insert_message(
                &mut tx,
                conversation.id,
                SenderType::Bot,
                None,
                MessageKind::Event,
                "Hi! I am your support assistant. Select a quick question or choose talk to agent.",
                Some(json!({"show_talk_to_agent": true})),
            )
            .await?;

            tx.commit().await?;

            tracing::info!(
                conversation_id = %conversation.id,
                "Conversation started"
            );
            conversation
        }
    };

    let messages = list_messages(&state.pool, conversation.id).await?;
    let quick_questions = list_active_faqs(&state.pool).await?;

    Ok(Json(ConversationBootstrapResponse {
        show_talk_to_agent: ConversationLifecycle::offers_escalation(conversation.status),
        conversation: ConversationSnapshot::from(&conversation),
        messages: messages.iter().map(MessageSnapshot::from).collect(),
        quick_questions: quick_questions.iter().map(QuickQuestion::from).collect(),
    }))
}

/// List the active quick questions offered in automated mode
pub async fn list_quick_questions(
    State(state): State<AppState>,
) -> ApiResult<Json<QuickQuestionsResponse>> {
    let quick_questions = list_active_faqs(&state.pool).await?;
    Ok(Json(QuickQuestionsResponse {
        quick_questions: quick_questions.iter().map(QuickQuestion::from).collect(),
    }))
}

/// Fetch a conversation snapshot the caller owns
pub async fn get_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<ConversationSnapshot>> {
    let session_id = require_session_id(&headers)?;
    let conversation = get_owned_conversation(&state.pool, conversation_id, &session_id).await?;
    Ok(Json(ConversationSnapshot::from(&conversation)))
}

/// Read the ordered message history for a conversation the caller owns
pub async fn get_conversation_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<ConversationMessagesResponse>> {
    let session_id = require_session_id(&headers)?;
    let conversation = get_owned_conversation(&state.pool, conversation_id, &session_id).await?;
    let messages = list_messages(&state.pool, conversation.id).await?;

    Ok(Json(ConversationMessagesResponse {
        conversation: ConversationSnapshot::from(&conversation),
        messages: messages.iter().map(MessageSnapshot::from).collect(),
    }))
}

/// Send a free-text customer message.
///
/// In automated mode the bot reply is generated and committed in the same
/// transaction; in agent mode the message is accepted regardless of the
/// assigned agent's presence.
pub async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<BotExchangeResponse>> {
    let session_id = require_session_id(&headers)?;
    let content = validate_content(&req.content)?;
    check_rate_limit(&state, &session_id).await?;

    let mut tx = state.pool.begin().await?;
    let conversation = lock_owned_conversation(&mut tx, conversation_id, &session_id).await?;

    if ConversationLifecycle::is_read_only(conversation.status) {
        return Err(ApiError::ConversationClosed);
    }

    let customer_message = insert_message(
        &mut tx,
        conversation.id,
        SenderType::Customer,
        None,
        MessageKind::Text,
        &content,
        None,
    )
    .await?;

    if conversation.status == ConversationStatus::Agent {
        // Presence never affects acceptance; an offline assigned agent
        // keeps the chat and the customer simply waits for a reply.
        let conversation = touch_conversation(&mut tx, conversation.id).await?;
        tx.commit().await?;

        publish_message(&state, &customer_message).await;
        publish_conversation_updated(&state, &conversation).await;

        return Ok(Json(BotExchangeResponse {
            conversation: ConversationSnapshot::from(&conversation),
            customer_message: MessageSnapshot::from(&customer_message),
            bot_message: None,
            quick_questions: Vec::new(),
            show_talk_to_agent: false,
        }));
    }

    // Automated mode: generate the bot reply inside the same transaction.
    let faq_match = find_faq_match(&mut tx, &content).await?;
    let quick_questions = list_active_faqs(&mut *tx).await?;

    let (bot_content, bot_metadata) = match &faq_match {
        Some(faq) => (
            faq.answer.clone(),
            json!({"faq_slug": faq.slug, "show_talk_to_agent": true}),
        ),
        None => {
            let prompt_list = quick_questions
                .iter()
                .take(3)
                .map(|faq| faq.question.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let content = if prompt_list.is_empty() {
                "I can help with common support questions.".to_string()
            } else {
                format!("I can help with common questions. Try one of these: {prompt_list}.")
            };
            (content, json!({"show_talk_to_agent": true}))
        }
    };

    let bot_message = insert_message(
        &mut tx,
        conversation.id,
        SenderType::Bot,
        None,
        MessageKind::Text,
        &bot_content,
        Some(bot_metadata),
    )
    .await?;

    let conversation = touch_conversation(&mut tx, conversation.id).await?;
    tx.commit().await?;

    publish_message(&state, &customer_message).await;
    publish_message(&state, &bot_message).await;
    publish_conversation_updated(&state, &conversation).await;

    Ok(Json(BotExchangeResponse {
        show_talk_to_agent: ConversationLifecycle::offers_escalation(conversation.status),
        conversation: ConversationSnapshot::from(&conversation),
        customer_message: MessageSnapshot::from(&customer_message),
        bot_message: Some(MessageSnapshot::from(&bot_message)),
        quick_questions: quick_questions.iter().map(QuickQuestion::from).collect(),
    }))
}

/// Send an FAQ quick reply. Only valid while the bot is driving.
pub async fn send_quick_reply(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<QuickReplyRequest>,
) -> ApiResult<Json<BotExchangeResponse>> {
    let session_id = require_session_id(&headers)?;
    check_rate_limit(&state, &session_id).await?;

    let mut tx = state.pool.begin().await?;
    let conversation = lock_owned_conversation(&mut tx, conversation_id, &session_id).await?;

    if ConversationLifecycle::is_read_only(conversation.status) {
        return Err(ApiError::ConversationClosed);
    }
    if conversation.status != ConversationStatus::Automated {
        return Err(ApiError::InvalidTransition(
            "quick replies are only available in automated mode".to_string(),
        ));
    }

    let faq: Option<FaqEntryRow> = sqlx::query_as(
        r#"
        SELECT id, slug, question, answer, display_order, is_active
        FROM faq_entries
        WHERE slug = $1 AND is_active = TRUE
        LIMIT 1
        "#,
    )
    .bind(req.faq_slug.trim())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(faq) = faq else {
        return Err(ApiError::Validation(format!(
            "Unknown FAQ slug '{}'",
            req.faq_slug.trim()
        )));
    };

    let customer_message = insert_message(
        &mut tx,
        conversation.id,
        SenderType::Customer,
        None,
        MessageKind::QuickReply,
        &faq.question,
        Some(json!({"faq_slug": faq.slug})),
    )
    .await?;

    let bot_message = insert_message(
        &mut tx,
        conversation.id,
        SenderType::Bot,
        None,
        MessageKind::Text,
        &faq.answer,
        Some(json!({"faq_slug": faq.slug, "show_talk_to_agent": true})),
    )
    .await?;

    let quick_questions = list_active_faqs(&mut *tx).await?;
    let conversation = touch_conversation(&mut tx, conversation.id).await?;
    tx.commit().await?;

    publish_message(&state, &customer_message).await;
    publish_message(&state, &bot_message).await;
    publish_conversation_updated(&state, &conversation).await;

    Ok(Json(BotExchangeResponse {
        show_talk_to_agent: ConversationLifecycle::offers_escalation(conversation.status),
        conversation: ConversationSnapshot::from(&conversation),
        customer_message: MessageSnapshot::from(&customer_message),
        bot_message: Some(MessageSnapshot::from(&bot_message)),
        quick_questions: quick_questions.iter().map(QuickQuestion::from).collect(),
    }))
}

/// Escalate a conversation to a human agent.
///
/// Idempotent: once the conversation has left `automated`, replays return
/// the current snapshot without appending messages or re-running
/// assignment. Exactly one caller of a double-click wins the transition;
/// the conversation row lock decides which.
pub async fn escalate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<Json<EscalateResponse>> {
    let session_id = require_session_id(&headers)?;

    // The guard spans candidate selection through commit so concurrent
    // escalations observe a stable load snapshot.
    let _guard = state.assignment.acquire().await?;

    let mut tx = state.pool.begin().await?;
    let conversation = lock_owned_conversation(&mut tx, conversation_id, &session_id).await?;

    let transition =
        ConversationLifecycle::transition(conversation.status, TransitionAction::EscalateToAgent)
            .map_err(|e| ApiError::InvalidTransition(e.to_string()))?;

    if !transition.changed() {
        // Idempotent replay: same snapshot, no new messages, no second
        // assignment attempt.
        return Ok(Json(EscalateResponse {
            conversation: ConversationSnapshot::from(&conversation),
            customer_message: None,
            system_message: None,
        }));
    }

    sqlx::query(
        r#"
        UPDATE conversations
        SET status = 'agent'::conversation_status,
            requested_agent_at = COALESCE(requested_agent_at, NOW()),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(conversation.id)
    .execute(&mut *tx)
    .await?;

    let customer_message = insert_message(
        &mut tx,
        conversation.id,
        SenderType::Customer,
        None,
        MessageKind::QuickReply,
        "Talk to an agent",
        Some(json!({"action": "talk_to_agent"})),
    )
    .await?;

    let assigned_agent = AssignmentCoordinator::select_and_assign(&mut tx, conversation.id).await?;

    let system_message = match &assigned_agent {
        Some(agent) => {
            let agent_name = display_agent_name(agent);
            insert_message(
                &mut tx,
                conversation.id,
                SenderType::System,
                None,
                MessageKind::Event,
                &format!("{agent_name} is connected. You can continue typing your message."),
                Some(json!({
                    "assigned_agent_id": agent.id,
                    "assigned_agent_name": agent_name,
                    "show_talk_to_agent": false,
                })),
            )
            .await?
        }
        None => {
            insert_message(
                &mut tx,
                conversation.id,
                SenderType::System,
                None,
                MessageKind::Event,
                "All agents are currently busy. You are in queue and will be connected soon.",
                Some(json!({"queued_for_agent": true, "show_talk_to_agent": false})),
            )
            .await?
        }
    };

    let conversation = touch_conversation(&mut tx, conversation.id).await?;
    tx.commit().await?;

    tracing::info!(
        conversation_id = %conversation.id,
        assigned = assigned_agent.is_some(),
        "Conversation escalated to agent"
    );

    publish_message(&state, &customer_message).await;
    publish_message(&state, &system_message).await;
    publish_conversation_updated(&state, &conversation).await;
    if let Some(agent) = &assigned_agent {
        state
            .hub
            .publish(
                &conversation_channels(&conversation),
                ServerEvent::AgentAssigned {
                    conversation: ConversationSnapshot::from(&conversation),
                    agent: agent.into(),
                },
            )
            .await;
    }

    Ok(Json(EscalateResponse {
        conversation: ConversationSnapshot::from(&conversation),
        customer_message: Some(MessageSnapshot::from(&customer_message)),
        system_message: Some(MessageSnapshot::from(&system_message)),
    }))
}

// =============================================================================
// Helpers
// =============================================================================

fn resolve_session_id(requested: Option<String>) -> String {
    match requested.map(|s| s.trim().to_string()) {
        Some(session_id) if !session_id.is_empty() => session_id,
        _ => Uuid::new_v4().simple().to_string(),
    }
}

pub(crate) fn validate_content(content: &str) -> ApiResult<String> {
    let cleaned = content.trim();
    if cleaned.is_empty() {
        return Err(ApiError::Validation(
            "Message content cannot be empty".to_string(),
        ));
    }
    if cleaned.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::Validation(format!(
            "Message content too long (max {MAX_MESSAGE_LENGTH} characters)"
        )));
    }
    Ok(cleaned.to_string())
}

async fn check_rate_limit(state: &AppState, session_id: &str) -> ApiResult<()> {
    let rule = RateLimitRule::per_minute(state.config.customer_messages_per_minute);
    if !state.rate_limiter.allow(session_id, rule).await {
        tracing::warn!("Customer message rate limit hit");
        return Err(ApiError::RateLimited);
    }
    Ok(())
}

/// Fetch a conversation the session owns. Missing and foreign conversations
/// are the same NotFound to the caller.
pub(crate) async fn get_owned_conversation<'e, E>(
    executor: E,
    conversation_id: Uuid,
    session_id: &str,
) -> ApiResult<ConversationRow>
where
    E: PgExecutor<'e>,
{
    let conversation: Option<ConversationRow> = sqlx::query_as(
        r#"
        SELECT id, customer_session_id, status::text AS status, assigned_agent_id,
               requested_agent_at, closed_at, created_at, updated_at
        FROM conversations
        WHERE id = $1 AND customer_session_id = $2
        "#,
    )
    .bind(conversation_id)
    .bind(session_id)
    .fetch_optional(executor)
    .await?;

    conversation.ok_or(ApiError::NotFound)
}

/// Same ownership check, but locks the row for the transaction so
/// concurrent writes to the same conversation serialize.
async fn lock_owned_conversation(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: Uuid,
    session_id: &str,
) -> ApiResult<ConversationRow> {
    let conversation: Option<ConversationRow> = sqlx::query_as(
        r#"
        SELECT id, customer_session_id, status::text AS status, assigned_agent_id,
               requested_agent_at, closed_at, created_at, updated_at
        FROM conversations
        WHERE id = $1 AND customer_session_id = $2
        FOR UPDATE
        "#,
    )
    .bind(conversation_id)
    .bind(session_id)
    .fetch_optional(&mut **tx)
    .await?;

    conversation.ok_or(ApiError::NotFound)
}

pub(crate) async fn list_messages<'e, E>(
    executor: E,
    conversation_id: Uuid,
) -> Result<Vec<MessageRow>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as(
        r#"
        SELECT id, conversation_id, sender_type::text AS sender_type, sender_agent_id,
               kind::text AS kind, content, metadata, created_at
        FROM messages
        WHERE conversation_id = $1
        ORDER BY created_at ASC, seq ASC
        "#,
    )
    .bind(conversation_id)
    .fetch_all(executor)
    .await
}

async fn list_active_faqs<'e, E>(executor: E) -> Result<Vec<FaqEntryRow>, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query_as(
        r#"
        SELECT id, slug, question, answer, display_order, is_active
        FROM faq_entries
        WHERE is_active = TRUE
        ORDER BY display_order ASC, created_at ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// Exact match of customer text against an active FAQ question or slug
async fn find_faq_match(
    tx: &mut Transaction<'_, Postgres>,
    content: &str,
) -> Result<Option<FaqEntryRow>, sqlx::Error> {
    sqlx::query_as(
        r#"
        SELECT id, slug, question, answer, display_order, is_active
        FROM faq_entries
        WHERE is_active = TRUE
          AND (LOWER(question) = LOWER($1) OR LOWER(slug) = LOWER($1))
        ORDER BY display_order ASC
        LIMIT 1
        "#,
    )
    .bind(content.trim())
    .fetch_optional(&mut **tx)
    .await
}

pub(crate) async fn insert_message(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: Uuid,
    sender_type: SenderType,
    sender_agent_id: Option<Uuid>,
    kind: MessageKind,
    content: &str,
    metadata: Option<JsonValue>,
) -> Result<MessageRow, sqlx::Error> {
    sqlx::query_as(
        r#"
        INSERT INTO messages (conversation_id, sender_type, sender_agent_id, kind, content, metadata)
        VALUES ($1, $2::sender_type, $3, $4::message_kind, $5, $6)
        RETURNING id, conversation_id, sender_type::text AS sender_type, sender_agent_id,
                  kind::text AS kind, content, metadata, created_at
        "#,
    )
    .bind(conversation_id)
    .bind(sender_type.as_str())
    .bind(sender_agent_id)
    .bind(kind.as_str())
    .bind(content)
    .bind(metadata)
    .fetch_one(&mut **tx)
    .await
}

/// Bump `updated_at` and return the fresh row as of this transaction
pub(crate) async fn touch_conversation(
    tx: &mut Transaction<'_, Postgres>,
    conversation_id: Uuid,
) -> Result<ConversationRow, sqlx::Error> {
    sqlx::query_as(
        r#"
        UPDATE conversations
        SET updated_at = NOW()
        WHERE id = $1
        RETURNING id, customer_session_id, status::text AS status, assigned_agent_id,
                  requested_agent_at, closed_at, created_at, updated_at
        "#,
    )
    .bind(conversation_id)
    .fetch_one(&mut **tx)
    .await
}

pub(crate) fn conversation_channels(conversation: &ConversationRow) -> Vec<String> {
    let mut channels = vec![conversation_channel(conversation.id)];
    if let Some(agent_id) = conversation.assigned_agent_id {
        channels.push(agent_queue_channel(agent_id));
    }
    channels
}

pub(crate) async fn publish_message(state: &AppState, message: &MessageRow) {
    state
        .hub
        .publish(
            &[conversation_channel(message.conversation_id)],
            ServerEvent::MessageCreated {
                conversation_id: message.conversation_id,
                message: MessageSnapshot::from(message),
            },
        )
        .await;
}

pub(crate) async fn publish_conversation_updated(state: &AppState, conversation: &ConversationRow) {
    state
        .hub
        .publish(
            &conversation_channels(conversation),
            ServerEvent::ConversationUpdated {
                conversation: ConversationSnapshot::from(conversation),
            },
        )
        .await;
}

fn display_agent_name(agent: &AgentRow) -> String {
    let name = agent.display_name.trim();
    if name.is_empty() {
        "Support agent".to_string()
    } else {
        name.to_string()
    }
}
