//! API routes

pub mod agent;
pub mod customer;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::{auth::require_agent_auth, state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Customer chat routes (scoped by X-Session-Id header, no bearer auth)
    let customer_routes = Router::new()
        .route("/conversations/start", post(customer::start_conversation))
        .route("/conversations/:conversation_id", get(customer::get_conversation))
        .route(
            "/conversations/:conversation_id/messages",
            get(customer::get_conversation_messages).post(customer::send_message),
        )
        .route(
            "/conversations/:conversation_id/quick-replies",
            post(customer::send_quick_reply),
        )
        .route("/conversations/:conversation_id/escalate", post(customer::escalate))
        .route("/quick-questions", get(customer::list_quick_questions));

    // Public agent routes (no auth required)
    let agent_public_routes = Router::new()
        .route("/register", post(agent::register_agent))
        .route("/auth/login", post(agent::login));

    // Protected agent routes (bearer auth required)
    let agent_protected_routes = Router::new()
        .route("/me", get(agent::me))
        .route("/presence", post(agent::set_presence))
        .route("/conversations", get(agent::list_conversations))
        .route(
            "/conversations/:conversation_id/messages",
            get(agent::get_conversation_messages).post(agent::send_message),
        )
        .route(
            "/conversations/:conversation_id/close",
            post(agent::close_conversation),
        )
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_agent_auth,
        ));

    // WebSocket routes (auth handled in handler via query parameters)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    // Combine API routes under /api/v1 prefix
    let api_v1_routes = Router::new()
        .nest("/chat", customer_routes)
        .nest("/agent", agent_public_routes.merge(agent_protected_routes))
        .merge(websocket_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        // Global request body size limit to prevent DoS via large payloads
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB limit
        .with_state(state)
}
