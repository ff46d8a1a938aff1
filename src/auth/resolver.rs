//! Picks the identity pool that verifies a request's token.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::rejection::AuthRejection;
use crate::clients::ProviderClients;
use crate::config::TenancyConfig;
use crate::provider::IdentityClient;
use crate::types::TenantId;

/// Select the verifying client for a request.
///
/// A pinned tenant always wins and the tenant header is never read. With
/// enforcement off the project-level client is used. Otherwise the header
/// names the tenant, which must be non-empty, not denylisted and resolvable.
pub fn select_verifier(
    config: &TenancyConfig,
    clients: &ProviderClients,
    tenant_header: Option<&str>,
) -> Result<Arc<dyn IdentityClient>, AuthRejection> {
    if let Some(pinned) = clients.pinned() {
        return Ok(pinned.clone());
    }

    if !config.enforce_tenant() {
        return Ok(clients.base().clone());
    }

    let tenant_id = tenant_header.unwrap_or_default();
    if tenant_id.is_empty() {
        debug!("Rejecting request without tenant id");
        return Err(AuthRejection::missing_tenant_id());
    }

    if config.is_blocked(tenant_id) {
        warn!(tenant_id = %tenant_id, "Rejecting request for denylisted tenant");
        return Err(AuthRejection::invalid_tenant_id());
    }

    clients
        .tenants()
        .auth_for_tenant(&TenantId::new(tenant_id))
        .map_err(|e| {
            warn!(tenant_id = %tenant_id, "Error getting tenant client: {}", e);
            AuthRejection::invalid_tenant_id()
        })
}
