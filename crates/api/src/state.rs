//! Shared application state

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use supportdesk_shared::RateLimiter;

use crate::assignment::AssignmentCoordinator;
use crate::auth::{AuthState, JwtManager};
use crate::config::Config;
use crate::websocket::ChannelHub;

/// Application state shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: JwtManager,
    pub hub: ChannelHub,
    pub assignment: AssignmentCoordinator,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let assignment =
            AssignmentCoordinator::new(Duration::from_millis(config.assignment_lock_timeout_ms));

        Self {
            pool,
            config: Arc::new(config),
            jwt,
            hub: ChannelHub::new(),
            assignment,
            rate_limiter: Arc::new(RateLimiter::new()),
        }
    }

    /// State handed to the auth middleware layer
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt: self.jwt.clone(),
            pool: self.pool.clone(),
        }
    }
}
