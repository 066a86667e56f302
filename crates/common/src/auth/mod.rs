//! Authentication utilities
//!
//! Provides:
//! - JWT validation for bearer tokens minted by the identity provider
//! - Request context extraction for handlers
//! - Digest helpers for idempotency keys and webhook secrets

use crate::errors::{AppError, Result};
use crate::generation::Requester;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use uuid::Uuid;

/// Header carrying the shared secret on training callbacks
pub const TRAINING_SECRET_HEADER: &str = "x-training-secret";

/// Extracted authentication context available to handlers
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// User ID (`sub` claim)
    pub user_id: Uuid,

    /// Team the request acts for, if any
    pub team_id: Option<Uuid>,

    pub email: Option<String>,

    /// Request ID for tracing
    pub request_id: String,
}

impl AuthContext {
    pub fn requester(&self) -> Requester {
        Requester {
            user_id: self.user_id,
            team_id: self.team_id,
        }
    }
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID)
    pub sub: String,

    pub aud: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Verifies HS256 tokens issued by the identity provider
pub struct JwtManager {
    decoding_key: DecodingKey,
    audience: String,
}

impl JwtManager {
    /// Create a new JWT manager with the given secret
    pub fn new(secret: &str, audience: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            audience: audience.to_string(),
        }
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<JwtClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.audience.as_str()]);

        decode::<JwtClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredToken,
                _ => AppError::InvalidToken,
            })
    }

    /// Resolve a token into a handler context
    pub fn authenticate(&self, token: &str, request_id: String) -> Result<AuthContext> {
        let claims = self.validate_token(token)?;

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidToken)?;
        let team_id = claims
            .team_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|_| AppError::InvalidToken)?;

        Ok(AuthContext {
            user_id,
            team_id,
            email: claims.email,
            request_id,
        })
    }
}

fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\x00");
        }
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// Scope a client-supplied idempotency key to its user
pub fn hash_idempotency_key(user_id: Uuid, raw: &str) -> String {
    sha256_hex(&[user_id.as_bytes(), raw.trim().as_bytes()])
}

/// Compare a presented secret to the configured one by digest, so the
/// comparison time does not depend on where the inputs first differ
pub fn verify_shared_secret(provided: &str, expected: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Extract token from Authorization header
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Request ID from `x-request-id`, or a fresh one
pub fn request_id(parts: &Parts) -> String {
    parts
        .headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Axum extractor for AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<JwtManager>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let jwt = Arc::<JwtManager>::from_ref(state);

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
            })?;

        let token = extract_bearer(auth_header).ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header must be a bearer token".to_string(),
        })?;

        jwt.authenticate(token, request_id(parts))
    }
}

/// Token minting for tests; issuance belongs to the identity provider
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::JwtClaims;
    use chrono::{Duration, Utc};
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use uuid::Uuid;

    /// Sign claims the way the identity provider does
    pub fn sign_claims(secret: &str, claims: &JwtClaims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("HS256 signing with an in-memory key cannot fail")
    }

    /// Token for `user_id` valid for one hour
    pub fn issue_token(
        secret: &str,
        audience: &str,
        user_id: Uuid,
        team_id: Option<Uuid>,
        email: Option<&str>,
    ) -> String {
        let now = Utc::now();
        sign_claims(
            secret,
            &JwtClaims {
                sub: user_id.to_string(),
                aud: audience.to_string(),
                team_id: team_id.map(|t| t.to_string()),
                email: email.map(str::to_string),
                exp: (now + Duration::hours(1)).timestamp(),
                iat: now.timestamp(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{issue_token, sign_claims};
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_idempotency_key_is_user_scoped() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        assert_eq!(hash_idempotency_key(alice, "req-1"), hash_idempotency_key(alice, " req-1 "));
        assert_ne!(hash_idempotency_key(alice, "req-1"), hash_idempotency_key(bob, "req-1"));
        assert_eq!(hash_idempotency_key(alice, "req-1").len(), 64);
    }

    #[test]
    fn test_shared_secret() {
        assert!(verify_shared_secret("s3cret", "s3cret"));
        assert!(!verify_shared_secret("s3cret ", "s3cret"));
        assert!(!verify_shared_secret("", ""));
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer abc.def"), Some("abc.def"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }

    #[test]
    fn test_jwt_roundtrip() {
        let manager = JwtManager::new("test_secret", "authenticated");
        let user_id = Uuid::new_v4();
        let team_id = Uuid::new_v4();

        let token = issue_token("test_secret", "authenticated", user_id, Some(team_id), Some("a@example.com"));
        let ctx = manager.authenticate(&token, "req-1".to_string()).unwrap();

        assert_eq!(ctx.user_id, user_id);
        assert_eq!(ctx.team_id, Some(team_id));
        assert_eq!(ctx.email.as_deref(), Some("a@example.com"));
        assert_eq!(ctx.requester().user_id, user_id);
    }

    #[test]
    fn test_wrong_audience_or_secret_rejected() {
        let token = issue_token("test_secret", "service_role", Uuid::new_v4(), None, None);

        let verifier = JwtManager::new("test_secret", "authenticated");
        assert!(matches!(verifier.validate_token(&token), Err(AppError::InvalidToken)));

        let other = JwtManager::new("other_secret", "service_role");
        assert!(matches!(other.validate_token(&token), Err(AppError::InvalidToken)));
    }

    #[test]
    fn test_expired_token() {
        let manager = JwtManager::new("test_secret", "authenticated");
        let token = sign_claims(
            "test_secret",
            &JwtClaims {
                sub: Uuid::new_v4().to_string(),
                aud: "authenticated".to_string(),
                team_id: None,
                email: None,
                exp: Utc::now().timestamp() - 3600,
                iat: Utc::now().timestamp() - 7200,
            },
        );

        assert!(matches!(manager.validate_token(&token), Err(AppError::ExpiredToken)));
    }
}
