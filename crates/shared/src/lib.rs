//! Supportdesk Shared Types and Utilities
//!
//! This crate contains types, errors, and utilities shared across the
//! Supportdesk chat platform.

pub mod db;
pub mod error;
pub mod rate_limit;
pub mod reconnect;
pub mod sync;
pub mod types;

pub use db::*;
pub use error::*;
pub use rate_limit::{RateLimitRule, RateLimiter};
pub use reconnect::{ConnectionState, ReconnectAction, ReconnectPolicy};
pub use sync::SnapshotCache;
pub use types::*;
