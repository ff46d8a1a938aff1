// REST API endpoints for the auth service

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::Json,
    routing::{get, patch, post},
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthenticatedUser, TENANT_ID_HEADER, TokenAuthenticator, require_auth};
use crate::clients::ProviderClients;
use crate::config::TenancyConfig;
use crate::error::AdminError;
use crate::provider::{Tenant, TenantToCreate, TenantToUpdate, UserRecord, UserToCreate, UserToUpdate};
use crate::tenants::{TenantAdmin, TenantInheritanceConfig};
use crate::types::UserId;
use crate::users::UserManager;

/// Shared state for both routers.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<TokenAuthenticator>,
    pub users: UserManager,
    pub tenants: TenantAdmin,
}

impl AppState {
    pub fn new(config: Arc<TenancyConfig>, clients: Arc<ProviderClients>) -> Self {
        Self {
            authenticator: Arc::new(TokenAuthenticator::new(config.clone(), clients.clone())),
            users: UserManager::new(config.clone(), clients.clone()),
            tenants: TenantAdmin::new(config, clients),
        }
    }
}

/// Routes for end users. Everything except `/health` requires a valid token.
pub fn create_public_router(state: AppState) -> Router {
    Router::new()
        .route("/me", get(current_user))
        .route_layer(middleware::from_fn_with_state(
            state.authenticator.clone(),
            require_auth,
        ))
        .route("/health", get(health_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Administrative routes. Unauthenticated: bind them to a trusted interface.
pub fn create_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/users", post(create_user))
        .route("/users/{uid}", patch(update_user).delete(delete_user))
        .route("/tenants", post(create_tenant))
        .route("/tenants/{tenant_id}", patch(update_tenant).delete(delete_tenant))
        .route("/tenants/{tenant_id}/inheritance", patch(update_inheritance))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn current_user(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

/// Tenant named by the request, empty when absent.
fn requested_tenant(headers: &HeaderMap) -> &str {
    headers
        .get(TENANT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(user): Json<UserToCreate>,
) -> Result<(StatusCode, Json<UserRecord>), AdminError> {
    let record = state.users.create_user(&user, requested_tenant(&headers)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_user(
    State(state): State<AppState>,
    Path(uid): Path<UserId>,
    headers: HeaderMap,
    Json(update): Json<UserToUpdate>,
) -> Result<Json<UserRecord>, AdminError> {
    let record = state
        .users
        .update_user(&uid, &update, requested_tenant(&headers))
        .await?;
    Ok(Json(record))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(uid): Path<UserId>,
    headers: HeaderMap,
) -> Result<StatusCode, AdminError> {
    state.users.delete_user(&uid, requested_tenant(&headers)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_tenant(
    State(state): State<AppState>,
    Json(tenant): Json<TenantToCreate>,
) -> Result<(StatusCode, Json<Tenant>), AdminError> {
    let created = state.tenants.create_tenant(&tenant).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(update): Json<TenantToUpdate>,
) -> Result<Json<Tenant>, AdminError> {
    let updated = state.tenants.update_tenant(&tenant_id, &update).await?;
    Ok(Json(updated))
}

async fn delete_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<StatusCode, AdminError> {
    state.tenants.delete_tenant(&tenant_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_inheritance(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(inheritance): Json<TenantInheritanceConfig>,
) -> Result<StatusCode, AdminError> {
    state
        .tenants
        .update_tenant_inheritance(&tenant_id, inheritance)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
