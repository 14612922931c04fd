//! Supportdesk API Library
//!
//! This crate contains the API server components for the Supportdesk chat
//! backend: conversation lifecycle, agent assignment, customer and agent
//! routes, and the realtime fanout hub.

pub mod assignment;
pub mod auth;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod routes;
pub mod seed;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
