//! Authentication module for Supportdesk

pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{Claims, JwtManager};
pub use middleware::{
    authenticate_agent_token, require_agent_auth, require_session_id, AuthAgent, AuthState,
    SESSION_HEADER,
};
pub use password::{hash_password, validate_password_strength, verify_password};
