use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use shared::models::User;
use thiserror::Error;
use uuid::Uuid;

/// Session token errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("session lifetime overflow")]
    Lifetime,
}

/// Claims carried by the session cookie.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    /// Display name, for `GET /auth/status`.
    pub name: String,
    /// Email, for `GET /auth/status`.
    pub email: String,
    /// Expiry as a Unix timestamp.
    pub exp: i64,
}

/// Sign a session token for a user.
///
/// # Errors
/// Returns an error when signing fails or the TTL overflows.
pub fn issue(signing_key: &str, user: &User, ttl_hours: u64) -> Result<String, SessionError> {
    let ttl = i64::try_from(ttl_hours).map_err(|_| SessionError::Lifetime)?;
    let expires = Utc::now()
        .checked_add_signed(Duration::hours(ttl))
        .ok_or(SessionError::Lifetime)?;

    let claims = Claims {
        sub: user.user_id,
        name: user.name.clone(),
        email: user.email.clone(),
        exp: expires.timestamp(),
    };

    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(signing_key.as_bytes()),
    )?)
}

/// Verify a session token and return its claims.
///
/// # Errors
/// Returns an error for malformed, mis-signed, or expired tokens.
pub fn verify(signing_key: &str, token: &str) -> Result<Claims, SessionError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(signing_key.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}
