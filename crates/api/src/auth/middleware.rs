//! Authentication middleware and extractors
//!
//! Agent endpoints carry a bearer JWT; customer endpoints carry an opaque
//! `X-Session-Id` header. Neither side ever sees the other's credential.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

use super::jwt::JwtManager;

/// Header carrying the opaque customer session identifier.
pub const SESSION_HEADER: &str = "x-session-id";

/// Authenticated agent attached to the request extensions.
#[derive(Debug, Clone, Copy)]
pub struct AuthAgent {
    pub account_id: Uuid,
    pub agent_id: Uuid,
}

/// Shared state for auth middleware.
#[derive(Clone)]
pub struct AuthState {
    pub jwt: JwtManager,
    pub pool: PgPool,
}

/// Middleware requiring a valid agent bearer token.
///
/// The token is validated first, then the backing account is checked so a
/// deactivated account is locked out immediately rather than at token
/// expiry.
pub async fn require_agent_auth(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;

    let claims = auth
        .jwt
        .validate_token(&token)
        .map_err(|_| ApiError::InvalidToken)?;

    let account = resolve_active_account(&auth.pool, claims.sub).await?;
    if account.agent_id != claims.agent_id {
        return Err(ApiError::InvalidToken);
    }

    request.extensions_mut().insert(AuthAgent {
        account_id: account.account_id,
        agent_id: account.agent_id,
    });

    Ok(next.run(request).await)
}

/// Validate an agent token outside the middleware stack (websocket upgrade
/// authenticates via query parameter instead).
pub async fn authenticate_agent_token(auth: &AuthState, token: &str) -> ApiResult<AuthAgent> {
    let claims = auth
        .jwt
        .validate_token(token)
        .map_err(|_| ApiError::InvalidToken)?;

    let account = resolve_active_account(&auth.pool, claims.sub).await?;
    if account.agent_id != claims.agent_id {
        return Err(ApiError::InvalidToken);
    }

    Ok(AuthAgent {
        account_id: account.account_id,
        agent_id: account.agent_id,
    })
}

/// Extract the customer session identifier or reject the request.
pub fn require_session_id(headers: &HeaderMap) -> ApiResult<String> {
    let session_id = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default();

    if session_id.is_empty() {
        return Err(ApiError::Unauthorized);
    }

    Ok(session_id.to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

struct ActiveAccount {
    account_id: Uuid,
    agent_id: Uuid,
}

async fn resolve_active_account(pool: &PgPool, account_id: Uuid) -> ApiResult<ActiveAccount> {
    let row: Option<(Uuid, Uuid, bool)> = sqlx::query_as(
        "SELECT id, agent_id, is_active FROM agent_accounts WHERE id = $1",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some((id, agent_id, true)) => Ok(ActiveAccount {
            account_id: id,
            agent_id,
        }),
        Some(_) => Err(ApiError::InvalidToken),
        None => Err(ApiError::InvalidToken),
    }
}
