//! Bearer token authentication for HTTP requests.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::auth::context::AuthenticatedUser;
use crate::auth::rejection::AuthRejection;
use crate::auth::resolver::select_verifier;
use crate::clients::ProviderClients;
use crate::config::TenancyConfig;

/// Header naming the tenant when enforcement applies and none is pinned.
pub const TENANT_ID_HEADER: &str = "X-Tenant-Id";

const BEARER_PREFIX: &str = "Bearer ";

/// Authenticates requests against the identity provider.
///
/// Stateless across requests: every decision is derived from the token, the
/// tenant header and the read-only configuration.
#[derive(Clone)]
pub struct TokenAuthenticator {
    config: Arc<TenancyConfig>,
    clients: Arc<ProviderClients>,
}

impl TokenAuthenticator {
    pub fn new(config: Arc<TenancyConfig>, clients: Arc<ProviderClients>) -> Self {
        Self { config, clients }
    }

    /// Authenticate from raw header values.
    ///
    /// The token check comes first, so a request without a token never
    /// reaches tenant resolution or verification.
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        tenant_header: Option<&str>,
    ) -> Result<AuthenticatedUser, AuthRejection> {
        let token = bearer_token(authorization).ok_or_else(AuthRejection::missing_auth_token)?;

        let verifier = select_verifier(&self.config, &self.clients, tenant_header)?;

        let verified = verifier.verify_id_token(token).await.map_err(|e| {
            if e.is_id_token_expired() {
                debug!("Rejecting expired token: {}", e);
                AuthRejection::expired_auth_token()
            } else {
                debug!("Rejecting invalid token: {}", e);
                AuthRejection::invalid_auth_token()
            }
        })?;

        let user = AuthenticatedUser::from_token(&verified);
        debug!(
            user_id = %user.user_id,
            tenant_id = %user.tenant_id,
            "Token verified"
        );
        Ok(user)
    }

    /// Authenticate from request headers.
    pub async fn authenticate_headers(
        &self,
        headers: &HeaderMap,
    ) -> Result<AuthenticatedUser, AuthRejection> {
        let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let tenant_header = headers.get(TENANT_ID_HEADER).and_then(|v| v.to_str().ok());
        self.authenticate(authorization, tenant_header).await
    }
}

/// Token carried by an `Authorization` header, if any.
///
/// A value without the `Bearer ` prefix is taken as the token itself.
pub fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let header = authorization?;
    let token = header.strip_prefix(BEARER_PREFIX).unwrap_or(header);
    (!token.is_empty()).then_some(token)
}

/// Middleware that rejects unauthenticated requests with a 401 and stores
/// the [`AuthenticatedUser`] in the request extensions otherwise.
///
/// ```rust,ignore
/// let router = Router::new()
///     .route("/me", get(me))
///     .layer(middleware::from_fn_with_state(authenticator, require_auth));
/// ```
pub async fn require_auth(
    State(authenticator): State<Arc<TokenAuthenticator>>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticator.authenticate_headers(request.headers()).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(rejection) => {
            warn!(
                code = %rejection.code(),
                path = %request.uri().path(),
                "Request rejected"
            );
            rejection.into_response()
        }
    }
}
