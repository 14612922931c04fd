//! End-to-end conversation flow tests
//!
//! These exercise the full lifecycle against a real Postgres instance:
//! run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::Json;
use serial_test::serial;
use uuid::Uuid;

use supportdesk_api::auth::{AuthAgent, SESSION_HEADER};
use supportdesk_api::error::ApiError;
use supportdesk_api::routes::{agent, customer};
use supportdesk_api::seed::seed_faq_defaults;
use supportdesk_api::{AppState, Config};
use supportdesk_shared::db::{create_pool, run_migrations};
use supportdesk_shared::{ConversationStatus, MessageKind, SenderType};

async fn test_state() -> AppState {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let pool = create_pool(&url, 5).await.expect("Failed to create pool");
    run_migrations(&pool).await.expect("Failed to migrate");
    seed_faq_defaults(&pool).await.expect("Failed to seed FAQs");

    let config = Config {
        bind_address: "127.0.0.1:0".to_string(),
        database_url: url,
        database_max_connections: 5,
        jwt_secret: "integration-test-secret-at-least-32-chars".to_string(),
        jwt_expiry_hours: 1,
        enable_agent_registration: true,
        seed_faq_defaults: true,
        customer_messages_per_minute: 10_000,
        assignment_lock_timeout_ms: 2_000,
    };

    AppState::new(pool, config)
}

fn fresh_session() -> String {
    format!("sess-{}", Uuid::new_v4().simple())
}

fn session_headers(session_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        SESSION_HEADER,
        HeaderValue::from_str(session_id).expect("valid header"),
    );
    headers
}

async fn start_conversation(
    state: &AppState,
    session_id: &str,
) -> customer::ConversationBootstrapResponse {
    customer::start_conversation(
        State(state.clone()),
        Json(customer::StartConversationRequest {
            customer_session_id: Some(session_id.to_string()),
            force_new: false,
        }),
    )
    .await
    .expect("start conversation")
    .0
}

async fn register_online_agent(state: &AppState, max_active_chats: i32) -> AuthAgent {
    let username = format!("agent-{}", Uuid::new_v4().simple());
    let snapshot = agent::register_agent(
        State(state.clone()),
        Json(agent::RegisterAgentRequest {
            display_name: "Test Agent".to_string(),
            username: username.clone(),
            password: "AgentPass123".to_string(),
            max_active_chats,
            start_online: true,
        }),
    )
    .await
    .expect("register agent")
    .0;

    let (account_id,): (Uuid,) =
        sqlx::query_as("SELECT id FROM agent_accounts WHERE agent_id = $1")
            .bind(snapshot.id)
            .fetch_one(&state.pool)
            .await
            .expect("account row");

    AuthAgent {
        account_id,
        agent_id: snapshot.id,
    }
}

async fn take_all_agents_offline(state: &AppState) {
    sqlx::query("UPDATE agents SET presence = 'offline'")
        .execute(&state.pool)
        .await
        .expect("reset presence");
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn test_end_to_end_customer_flow() {
    let state = test_state().await;
    take_all_agents_offline(&state).await;

    let session_id = fresh_session();
    let bootstrap = start_conversation(&state, &session_id).await;

    assert_eq!(bootstrap.conversation.status, ConversationStatus::Automated);
    assert!(bootstrap.show_talk_to_agent);
    assert!(!bootstrap.quick_questions.is_empty());

    let conversation_id = bootstrap.conversation.id;
    let slug = bootstrap.quick_questions[0].slug.clone();

    // Quick reply gets a bot answer appended after the customer message
    let exchange = customer::send_quick_reply(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
        Json(customer::QuickReplyRequest {
            faq_slug: slug.clone(),
        }),
    )
    .await
    .expect("quick reply")
    .0;

    assert_eq!(exchange.customer_message.kind, MessageKind::QuickReply);
    let bot_message = exchange.bot_message.expect("bot reply");
    assert_eq!(bot_message.sender_type, SenderType::Bot);
    assert!(bot_message.created_at >= exchange.customer_message.created_at);

    // Escalate with an online agent available assigns immediately
    let auth = register_online_agent(&state, 5).await;
    let escalated = customer::escalate(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
    )
    .await
    .expect("escalate")
    .0;

    assert_eq!(escalated.conversation.status, ConversationStatus::Agent);
    assert_eq!(escalated.conversation.assigned_agent_id, Some(auth.agent_id));
    assert!(escalated.conversation.requested_agent_at.is_some());
    assert!(escalated.system_message.is_some());

    // Agent closes; closed timestamp set, assignment cleared
    let closed = agent::close_conversation(
        State(state.clone()),
        Extension(auth),
        Path(conversation_id),
    )
    .await
    .expect("close")
    .0;

    assert_eq!(closed.conversation.status, ConversationStatus::Closed);
    assert!(closed.conversation.closed_at.is_some());
    assert_eq!(closed.conversation.assigned_agent_id, None);

    // Further sends are rejected
    let rejected = customer::send_message(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
        Json(customer::SendMessageRequest {
            content: "hello?".to_string(),
        }),
    )
    .await;
    assert!(matches!(rejected, Err(ApiError::ConversationClosed)));
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn test_escalate_is_idempotent() {
    let state = test_state().await;
    take_all_agents_offline(&state).await;

    let session_id = fresh_session();
    let bootstrap = start_conversation(&state, &session_id).await;
    let conversation_id = bootstrap.conversation.id;

    let first = customer::escalate(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
    )
    .await
    .expect("first escalate")
    .0;

    assert_eq!(first.conversation.status, ConversationStatus::Agent);
    assert_eq!(first.conversation.assigned_agent_id, None);
    assert!(first.system_message.is_some());

    let second = customer::escalate(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
    )
    .await
    .expect("second escalate")
    .0;

    // Replay: same snapshot, nothing appended
    assert_eq!(second.conversation.status, ConversationStatus::Agent);
    assert_eq!(second.conversation.assigned_agent_id, None);
    assert!(second.customer_message.is_none());
    assert!(second.system_message.is_none());
    assert_eq!(
        second.conversation.requested_agent_at,
        first.conversation.requested_agent_at
    );

    // Exactly one system "queued" message exists
    let (system_count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM messages WHERE conversation_id = $1 AND sender_type = 'system'",
    )
    .bind(conversation_id)
    .fetch_one(&state.pool)
    .await
    .expect("count");
    assert_eq!(system_count, 1);
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn test_ownership_is_enforced_without_leaking_existence() {
    let state = test_state().await;

    let session_id = fresh_session();
    let bootstrap = start_conversation(&state, &session_id).await;
    let conversation_id = bootstrap.conversation.id;
    let intruder = session_headers(&fresh_session());

    let get = customer::get_conversation(
        State(state.clone()),
        intruder.clone(),
        Path(conversation_id),
    )
    .await;
    assert!(matches!(get, Err(ApiError::NotFound)));

    let history = customer::get_conversation_messages(
        State(state.clone()),
        intruder.clone(),
        Path(conversation_id),
    )
    .await;
    assert!(matches!(history, Err(ApiError::NotFound)));

    let send = customer::send_message(
        State(state.clone()),
        intruder.clone(),
        Path(conversation_id),
        Json(customer::SendMessageRequest {
            content: "hi".to_string(),
        }),
    )
    .await;
    assert!(matches!(send, Err(ApiError::NotFound)));

    let escalate = customer::escalate(
        State(state.clone()),
        intruder.clone(),
        Path(conversation_id),
    )
    .await;
    assert!(matches!(escalate, Err(ApiError::NotFound)));

    // A missing conversation is the same denial
    let missing = customer::get_conversation(
        State(state.clone()),
        intruder,
        Path(Uuid::new_v4()),
    )
    .await;
    assert!(matches!(missing, Err(ApiError::NotFound)));
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn test_assignment_prefers_least_loaded_agent() {
    let state = test_state().await;
    take_all_agents_offline(&state).await;

    let busy = register_online_agent(&state, 5).await;
    let idle = register_online_agent(&state, 5).await;

    // Fabricate two active chats on the first agent
    for _ in 0..2 {
        sqlx::query(
            r#"
            INSERT INTO conversations (customer_session_id, status, assigned_agent_id, requested_agent_at)
            VALUES ($1, 'agent', $2, NOW())
            "#,
        )
        .bind(fresh_session())
        .bind(busy.agent_id)
        .execute(&state.pool)
        .await
        .expect("fabricate load");
    }

    let session_id = fresh_session();
    let bootstrap = start_conversation(&state, &session_id).await;

    let escalated = customer::escalate(
        State(state.clone()),
        session_headers(&session_id),
        Path(bootstrap.conversation.id),
    )
    .await
    .expect("escalate")
    .0;

    assert_eq!(escalated.conversation.assigned_agent_id, Some(idle.agent_id));
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn test_escalation_with_no_agents_queues() {
    let state = test_state().await;
    take_all_agents_offline(&state).await;

    let session_id = fresh_session();
    let bootstrap = start_conversation(&state, &session_id).await;

    let escalated = customer::escalate(
        State(state.clone()),
        session_headers(&session_id),
        Path(bootstrap.conversation.id),
    )
    .await
    .expect("escalate")
    .0;

    assert_eq!(escalated.conversation.status, ConversationStatus::Agent);
    assert_eq!(escalated.conversation.assigned_agent_id, None);
    let queued = escalated.system_message.expect("queued system message");
    assert!(queued.content.contains("queue"));

    // The waiting conversation shows up in any agent's waiting filter
    let auth = register_online_agent(&state, 5).await;
    let listed = agent::list_conversations(
        State(state.clone()),
        Extension(auth),
        Query(agent::ListConversationsQuery {
            status: Some("waiting".to_string()),
        }),
    )
    .await
    .expect("list waiting")
    .0;
    assert!(listed
        .items
        .iter()
        .any(|c| c.id == escalated.conversation.id));
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn test_agent_claims_waiting_conversation_and_rivals_are_rejected() {
    let state = test_state().await;
    take_all_agents_offline(&state).await;

    let session_id = fresh_session();
    let bootstrap = start_conversation(&state, &session_id).await;
    let conversation_id = bootstrap.conversation.id;

    customer::escalate(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
    )
    .await
    .expect("escalate");

    let first = register_online_agent(&state, 5).await;
    let second = register_online_agent(&state, 5).await;

    let reply = agent::send_message(
        State(state.clone()),
        Extension(first),
        Path(conversation_id),
        Json(agent::SendAgentMessageRequest {
            content: "Hello, how can I help?".to_string(),
        }),
    )
    .await
    .expect("claim by reply")
    .0;
    assert_eq!(reply.conversation.assigned_agent_id, Some(first.agent_id));
    assert_eq!(reply.message.sender_agent_id, Some(first.agent_id));

    // Another agent can no longer send into it
    let rejected = agent::send_message(
        State(state.clone()),
        Extension(second),
        Path(conversation_id),
        Json(agent::SendAgentMessageRequest {
            content: "I'll take this one".to_string(),
        }),
    )
    .await;
    assert!(matches!(rejected, Err(ApiError::Forbidden)));

    // Customer messages are accepted even while the agent is offline
    take_all_agents_offline(&state).await;
    let accepted = customer::send_message(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
        Json(customer::SendMessageRequest {
            content: "are you still there?".to_string(),
        }),
    )
    .await
    .expect("customer send while agent offline")
    .0;
    assert!(accepted.bot_message.is_none());
    assert_eq!(
        accepted.conversation.assigned_agent_id,
        Some(first.agent_id)
    );
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn test_closed_is_terminal() {
    let state = test_state().await;
    take_all_agents_offline(&state).await;

    let session_id = fresh_session();
    let bootstrap = start_conversation(&state, &session_id).await;
    let conversation_id = bootstrap.conversation.id;

    customer::escalate(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
    )
    .await
    .expect("escalate");

    let auth = register_online_agent(&state, 5).await;
    let closed = agent::close_conversation(
        State(state.clone()),
        Extension(auth),
        Path(conversation_id),
    )
    .await
    .expect("close")
    .0;
    assert_eq!(closed.conversation.status, ConversationStatus::Closed);

    // Close replay is a no-op with the same snapshot
    let replay = agent::close_conversation(
        State(state.clone()),
        Extension(auth),
        Path(conversation_id),
    )
    .await
    .expect("close replay")
    .0;
    assert!(replay.system_message.is_none());
    assert_eq!(replay.conversation.closed_at, closed.conversation.closed_at);

    // Escalate replay is a no-op, not an error
    let escalate_replay = customer::escalate(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
    )
    .await
    .expect("escalate on closed")
    .0;
    assert_eq!(
        escalate_replay.conversation.status,
        ConversationStatus::Closed
    );
    assert!(escalate_replay.system_message.is_none());

    // Sends are rejected for both sides
    let customer_send = customer::send_message(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
        Json(customer::SendMessageRequest {
            content: "hello".to_string(),
        }),
    )
    .await;
    assert!(matches!(customer_send, Err(ApiError::ConversationClosed)));

    let agent_send = agent::send_message(
        State(state.clone()),
        Extension(auth),
        Path(conversation_id),
        Json(agent::SendAgentMessageRequest {
            content: "hello".to_string(),
        }),
    )
    .await;
    assert!(matches!(agent_send, Err(ApiError::ConversationClosed)));
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn test_message_history_keeps_append_order() {
    let state = test_state().await;

    let session_id = fresh_session();
    let bootstrap = start_conversation(&state, &session_id).await;
    let conversation_id = bootstrap.conversation.id;

    let first = customer::send_message(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
        Json(customer::SendMessageRequest {
            content: "first question".to_string(),
        }),
    )
    .await
    .expect("first send")
    .0;

    let second = customer::send_message(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
        Json(customer::SendMessageRequest {
            content: "second question".to_string(),
        }),
    )
    .await
    .expect("second send")
    .0;

    let history = customer::get_conversation_messages(
        State(state.clone()),
        session_headers(&session_id),
        Path(conversation_id),
    )
    .await
    .expect("history")
    .0;

    let ids: Vec<Uuid> = history.messages.iter().map(|m| m.id).collect();
    let first_pos = ids
        .iter()
        .position(|id| *id == first.customer_message.id)
        .expect("first in history");
    let second_pos = ids
        .iter()
        .position(|id| *id == second.customer_message.id)
        .expect("second in history");
    assert!(first_pos < second_pos);

    // History order matches the store's ordering key
    let mut sorted = history.messages.clone();
    sorted.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    let sorted_ids: Vec<Uuid> = sorted.iter().map(|m| m.id).collect();
    assert_eq!(ids, sorted_ids);
}

#[tokio::test]
#[ignore] // Requires database
#[serial]
async fn test_force_new_leaves_prior_conversation_resumable() {
    let state = test_state().await;

    let session_id = fresh_session();
    let first = start_conversation(&state, &session_id).await;

    // Resume returns the same conversation
    let resumed = start_conversation(&state, &session_id).await;
    assert_eq!(resumed.conversation.id, first.conversation.id);

    // force_new creates a fresh record
    let forced = customer::start_conversation(
        State(state.clone()),
        Json(customer::StartConversationRequest {
            customer_session_id: Some(session_id.clone()),
            force_new: true,
        }),
    )
    .await
    .expect("force new")
    .0;
    assert_ne!(forced.conversation.id, first.conversation.id);

    // The prior conversation is untouched and still readable
    let prior = customer::get_conversation(
        State(state.clone()),
        session_headers(&session_id),
        Path(first.conversation.id),
    )
    .await
    .expect("prior conversation")
    .0;
    assert_eq!(prior.status, ConversationStatus::Automated);
}
