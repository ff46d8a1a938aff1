//! Records exchanged with the identity provider.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{TenantId, UserId};

/// Claims of a successfully verified ID token.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    /// `sub` / `uid` claim.
    pub uid: UserId,
    /// Seconds since the epoch when the user authenticated.
    pub auth_time: i64,
    pub issued_at: i64,
    pub expires_at: i64,
    /// `firebase.tenant` claim, empty for project-level users.
    pub tenant_id: TenantId,
    /// All claims as sent, including custom claims.
    pub claims: Map<String, Value>,
}

impl VerifiedToken {
    pub fn email(&self) -> Option<&str> {
        self.claims.get("email").and_then(Value::as_str)
    }

    pub fn email_verified(&self) -> bool {
        self.claims
            .get("email_verified")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Properties for a new user. Unset fields are left to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserToCreate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

impl UserToCreate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn email_verified(mut self, verified: bool) -> Self {
        self.email_verified = Some(verified);
        self
    }
}

/// Changes to an existing user. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserToUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

/// A provider-managed user account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub uid: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "TenantId::is_empty")]
    pub tenant_id: TenantId,
}

/// Properties for a new tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantToCreate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_password_sign_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_email_link_sign_in: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_anonymous_users: Option<bool>,
}

/// Changes to an existing tenant. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantToUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_password_sign_up: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_email_link_sign_in: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_anonymous_users: Option<bool>,
}

impl TenantToUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// A provider-managed tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: TenantId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub allow_password_sign_up: bool,
    #[serde(default)]
    pub enable_email_link_sign_in: bool,
    #[serde(default)]
    pub enable_anonymous_users: bool,
}
