//! JWT token generation and validation

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// JWT claims structure for agent session tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (agent account ID)
    pub sub: Uuid,
    /// Agent identity the account logs into
    pub agent_id: Uuid,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// JWT manager for token operations
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    /// Create a new JWT manager
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    /// Generate an agent session token. Returns the token and its expiry.
    pub fn generate_token(
        &self,
        account_id: Uuid,
        agent_id: Uuid,
    ) -> Result<(String, OffsetDateTime), JwtError> {
        let now = OffsetDateTime::now_utc();
        let expires_at = now + Duration::hours(self.expiry_hours);

        let claims = Claims {
            sub: account_id,
            agent_id,
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
        };

        // Explicit algorithm prevents algorithm confusion attacks
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))?;

        Ok((token, expires_at))
    }

    /// Validate a token and return its claims
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let validation = Validation::new(Algorithm::HS256);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| JwtError::Invalid(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to encode token: {0}")]
    Encoding(String),
    #[error("Invalid token: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new("test-secret-at-least-32-characters-long!", 12)
    }

    #[test]
    fn test_token_round_trip() {
        let jwt = manager();
        let account_id = Uuid::new_v4();
        let agent_id = Uuid::new_v4();

        let (token, expires_at) = jwt.generate_token(account_id, agent_id).unwrap();
        let claims = jwt.validate_token(&token).unwrap();

        assert_eq!(claims.sub, account_id);
        assert_eq!(claims.agent_id, agent_id);
        assert_eq!(claims.exp, expires_at.unix_timestamp());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let jwt = manager();
        let (token, _) = jwt.generate_token(Uuid::new_v4(), Uuid::new_v4()).unwrap();

        let other = JwtManager::new("another-secret-at-least-32-characters!!", 12);
        assert!(other.validate_token(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let jwt = manager();
        assert!(jwt.validate_token("not-a-jwt").is_err());
    }
}
