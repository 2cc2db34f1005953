use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    /// Unique identifier.
    pub user_id: Uuid,
    /// Display name.
    pub name: String,
    /// Email address, unique across users.
    pub email: String,
    /// Accumulated usage cost. Written only by billing reconciliation.
    pub billing: f64,
}

/// Registration payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// Plaintext password; hashed before storage.
    pub password: String,
}

/// Login payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    /// Email address.
    pub email: String,
    /// Plaintext password.
    pub password: String,
}

/// Response of `GET /auth/status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthStatus {
    /// Whether the request carried a valid session.
    pub logged_in: bool,
    /// User id when logged in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Display name when logged in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Email when logged in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl AuthStatus {
    /// Status for an unauthenticated request.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            logged_in: false,
            user_id: None,
            name: None,
            email: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_round_trip() {
        let user = User {
            user_id: Uuid::new_v4(),
            name: "test".into(),
            email: "test@example.com".into(),
            billing: 0.25,
        };

        let serialized = serde_json::to_string(&user).unwrap();
        let deserialized: User = serde_json::from_str(&serialized).unwrap();
        assert_eq!(user, deserialized);
    }

    #[test]
    fn anonymous_status_omits_identity_fields() {
        let value = serde_json::to_value(AuthStatus::anonymous()).unwrap();
        assert_eq!(value, serde_json::json!({"logged_in": false}));
    }
}
