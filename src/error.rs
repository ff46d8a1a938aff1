//! Errors returned by the user and tenant administration operations.

use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::provider::ProviderError;

/// Administration errors.
///
/// Validation failures are detected locally; anything the provider returns
/// is carried unchanged in [`AdminError::Provider`].
#[derive(Debug, Clone)]
pub enum AdminError {
    /// No tenant id given and none can be inferred from configuration.
    MissingTenantId,
    /// Tenant id is denylisted or cannot be resolved to a client.
    InvalidTenantId,
    /// An access token for the management API could not be obtained.
    GeneratingToken,
    /// The request body could not be serialized.
    MarshalingRequest,
    /// The outbound HTTP request could not be built.
    CreatingRequest,
    /// The management API answered with a non-200 status.
    UnexpectedStatus { status: u16, body: String },
    /// Error returned by the provider, passed through untouched.
    Provider(ProviderError),
}

impl fmt::Display for AdminError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTenantId => write!(f, "missing tenant id"),
            Self::InvalidTenantId => write!(f, "invalid tenant id"),
            Self::GeneratingToken => write!(f, "error generating token"),
            Self::MarshalingRequest => write!(f, "error marshaling request"),
            Self::CreatingRequest => write!(f, "error creating request"),
            Self::UnexpectedStatus { status, body } => {
                write!(f, "[{}] Response body: {}", status, body)
            }
            Self::Provider(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AdminError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Provider(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ProviderError> for AdminError {
    fn from(err: ProviderError) -> Self {
        Self::Provider(err)
    }
}

impl AdminError {
    /// Stable machine-readable code for HTTP responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingTenantId => "MISSING_TENANT_ID",
            Self::InvalidTenantId => "INVALID_TENANT_ID",
            Self::GeneratingToken => "GENERATING_TOKEN",
            Self::MarshalingRequest => "MARSHALING_REQUEST",
            Self::CreatingRequest => "CREATING_REQUEST",
            Self::UnexpectedStatus { .. } => "UNEXPECTED_STATUS",
            Self::Provider(_) => "PROVIDER_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingTenantId | Self::InvalidTenantId => StatusCode::BAD_REQUEST,
            Self::GeneratingToken | Self::MarshalingRequest | Self::CreatingRequest => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::UnexpectedStatus { .. } | Self::Provider(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "status": status.as_u16(),
            "message": self.to_string(),
            "code": self.code(),
        });
        (status, Json(body)).into_response()
    }
}
