//! Authenticated user for request-scoped identity.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};

use crate::auth::rejection::AuthRejection;
use crate::provider::VerifiedToken;
use crate::types::{TenantId, UserId};

/// User extracted from a verified bearer token.
///
/// The middleware stores exactly one of these in the request extensions
/// (the extension type is the lookup key); handlers read it back with the
/// `AuthenticatedUser` extractor. It lives only as long as the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub email: String,
    pub email_verified: bool,
    /// Seconds since the epoch when the user signed in.
    pub auth_time: i64,
    /// Empty for users of the project-level pool.
    pub tenant_id: TenantId,
}

impl AuthenticatedUser {
    pub fn from_token(token: &VerifiedToken) -> Self {
        Self {
            user_id: token.uid.clone(),
            email: token.email().unwrap_or_default().to_string(),
            email_verified: token.email_verified(),
            auth_time: token.auth_time,
            tenant_id: token.tenant_id.clone(),
        }
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Only present when the route sits behind `require_auth`.
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(AuthRejection::missing_auth_token)
    }
}
