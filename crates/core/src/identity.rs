//! Authenticated user identity, token pairs, and registration input.

use std::fmt;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::roles::Role;
use crate::types::EntityId;
use crate::validation;

/// The backend's view of the signed-in user, as returned by `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: EntityId,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub full_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub phone_verified: bool,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_seller(&self) -> bool {
        self.role == Role::Seller
    }

    /// Optimistic patch applied after a successful OTP verification, until
    /// the next reload replaces it.
    pub fn mark_phone_verified(&mut self, phone: &str) {
        self.phone = Some(phone.to_string());
        self.phone_verified = true;
    }

    /// Optimistic patch applied after a successful email verification.
    pub fn mark_email_verified(&mut self) {
        self.is_verified = true;
    }
}

/// Access and refresh token, always held and persisted together.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct Registration {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "must be at least 8 characters long"))]
    pub password: String,
    #[validate(length(min = 1, message = "is required"))]
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "must not be empty"))]
    pub phone: Option<String>,
}

impl Registration {
    pub fn validate_fields(&self) -> Result<(), CoreError> {
        validation::into_result(validation::collect_issues(self))
    }
}

/// Body of `PUT /auth/me`. Only the fields that are set are sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}
