//! Error types shared across Supportdesk

use thiserror::Error;

/// Raised when a stored enum value does not match any known variant.
///
/// Surfaces through sqlx row decoding when a database value drifts from
/// the Rust-side enum set.
#[derive(Debug, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownEnumValue {
    pub kind: &'static str,
    pub value: String,
}
