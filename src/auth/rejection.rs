//! Rejections produced by the authentication middleware.

use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Fixed reasons for rejecting a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    MissingAuthToken,
    ExpiredAuthToken,
    InvalidAuthToken,
    MissingTenantId,
    InvalidTenantId,
}

impl RejectionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingAuthToken => "MISSING_AUTH_TOKEN",
            Self::ExpiredAuthToken => "EXPIRED_AUTH_TOKEN",
            Self::InvalidAuthToken => "INVALID_AUTH_TOKEN",
            Self::MissingTenantId => "MISSING_TENANT_ID",
            Self::InvalidTenantId => "INVALID_TENANT_ID",
        }
    }

    /// Human-readable message sent alongside the code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingAuthToken => "Missing authentication token",
            Self::ExpiredAuthToken => "Expired authentication token",
            Self::InvalidAuthToken => "Invalid authentication token",
            Self::MissingTenantId => "Missing Tenant ID",
            Self::InvalidTenantId => "Invalid Tenant ID",
        }
    }
}

impl fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A 401 response carrying one [`RejectionCode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRejection {
    code: RejectionCode,
}

/// JSON body of a rejection.
#[derive(Debug, Serialize)]
struct RejectionBody {
    status: u16,
    message: &'static str,
    code: RejectionCode,
}

impl AuthRejection {
    pub fn new(code: RejectionCode) -> Self {
        Self { code }
    }

    pub fn missing_auth_token() -> Self {
        Self::new(RejectionCode::MissingAuthToken)
    }

    pub fn expired_auth_token() -> Self {
        Self::new(RejectionCode::ExpiredAuthToken)
    }

    pub fn invalid_auth_token() -> Self {
        Self::new(RejectionCode::InvalidAuthToken)
    }

    pub fn missing_tenant_id() -> Self {
        Self::new(RejectionCode::MissingTenantId)
    }

    pub fn invalid_tenant_id() -> Self {
        Self::new(RejectionCode::InvalidTenantId)
    }

    pub fn code(&self) -> RejectionCode {
        self.code
    }
}

impl fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code.message(), self.code)
    }
}

impl std::error::Error for AuthRejection {}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = RejectionBody {
            status: StatusCode::UNAUTHORIZED.as_u16(),
            message: self.code.message(),
            code: self.code,
        };
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}
