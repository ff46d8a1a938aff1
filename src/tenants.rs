//! Tenant administration, including the inheritance settings the tenant
//! manager does not expose.

use std::sync::Arc;

use reqwest::{Method, StatusCode, header::CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::ProviderClients;
use crate::config::TenancyConfig;
use crate::error::AdminError;
use crate::provider::{ProviderError, ProviderErrorKind, Tenant, TenantToCreate, TenantToUpdate};
use crate::types::TenantId;

/// Field mask sent with inheritance updates.
pub const INHERITANCE_UPDATE_MASK: &str = "inheritance.emailSendingConfig";

/// Tenant settings inherited from the project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantInheritanceConfig {
    /// Whether the tenant sends email with the project's email settings.
    pub email_sending_enabled: bool,
}

#[derive(Serialize)]
struct InheritanceUpdate {
    inheritance: InheritanceBody,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InheritanceBody {
    email_sending_config: bool,
}

impl From<TenantInheritanceConfig> for InheritanceUpdate {
    fn from(config: TenantInheritanceConfig) -> Self {
        Self {
            inheritance: InheritanceBody {
                email_sending_config: config.email_sending_enabled,
            },
        }
    }
}

/// Creates, updates and deletes tenants.
#[derive(Clone)]
pub struct TenantAdmin {
    config: Arc<TenancyConfig>,
    clients: Arc<ProviderClients>,
}

impl TenantAdmin {
    pub fn new(config: Arc<TenancyConfig>, clients: Arc<ProviderClients>) -> Self {
        Self { config, clients }
    }

    /// Create a tenant. The provider assigns its id.
    pub async fn create_tenant(&self, tenant: &TenantToCreate) -> Result<Tenant, AdminError> {
        let created = self.clients.tenants().create_tenant(tenant).await?;
        info!(tenant_id = %created.id, "Tenant created");
        Ok(created)
    }

    pub async fn update_tenant(
        &self,
        tenant_id: &str,
        update: &TenantToUpdate,
    ) -> Result<Tenant, AdminError> {
        let tenant_id = self.checked_tenant(tenant_id)?;
        let updated = self.clients.tenants().update_tenant(&tenant_id, update).await?;
        info!(tenant_id = %tenant_id, "Tenant updated");
        Ok(updated)
    }

    pub async fn delete_tenant(&self, tenant_id: &str) -> Result<(), AdminError> {
        let tenant_id = self.checked_tenant(tenant_id)?;
        self.clients.tenants().delete_tenant(&tenant_id).await?;
        info!(tenant_id = %tenant_id, "Tenant deleted");
        Ok(())
    }

    /// Set whether a tenant inherits the project's email sending settings.
    ///
    /// Goes straight to the management REST API with a bearer token from the
    /// configured credentials. A non-200 answer comes back as
    /// [`AdminError::UnexpectedStatus`] with the raw status and body.
    pub async fn update_tenant_inheritance(
        &self,
        tenant_id: &str,
        inheritance: TenantInheritanceConfig,
    ) -> Result<(), AdminError> {
        let tenant_id = self.checked_tenant(tenant_id)?;

        let access_token = self.clients.credentials().token().await.map_err(|e| {
            warn!(tenant_id = %tenant_id, "Error generating access token: {}", e);
            AdminError::GeneratingToken
        })?;

        let body = serde_json::to_vec(&InheritanceUpdate::from(inheritance)).map_err(|e| {
            warn!(tenant_id = %tenant_id, "Error marshaling inheritance request: {}", e);
            AdminError::MarshalingRequest
        })?;

        let url = self.inheritance_url(&tenant_id)?;
        let request = self
            .clients
            .http()
            .request(Method::PATCH, url)
            .bearer_auth(&access_token.token)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .build()
            .map_err(|e| {
                warn!(tenant_id = %tenant_id, "Error creating inheritance request: {}", e);
                AdminError::CreatingRequest
            })?;

        debug!(tenant_id = %tenant_id, "PATCH {}", request.url());
        let response = self
            .clients
            .http()
            .execute(request)
            .await
            .map_err(ProviderError::from)?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.map_err(|e| {
                warn!(tenant_id = %tenant_id, "Error reading response body: {}", e);
                ProviderError::new(
                    ProviderErrorKind::Unexpected,
                    format!("Error reading response body: {}", e),
                )
            })?;
            warn!(tenant_id = %tenant_id, "Inheritance update failed with {}", status);
            return Err(AdminError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            tenant_id = %tenant_id,
            email_sending_enabled = inheritance.email_sending_enabled,
            "Tenant inheritance updated"
        );
        Ok(())
    }

    /// `{api}/v2/projects/{project}/tenants/{tenant}?updateMask=...`
    fn inheritance_url(&self, tenant_id: &TenantId) -> Result<Url, AdminError> {
        let mut url = self.clients.api_base().clone();
        url.path_segments_mut()
            .map_err(|_| AdminError::CreatingRequest)?
            .pop_if_empty()
            .extend([
                "v2",
                "projects",
                self.config.project_id().as_str(),
                "tenants",
                tenant_id.as_str(),
            ]);
        url.query_pairs_mut()
            .append_pair("updateMask", INHERITANCE_UPDATE_MASK);
        Ok(url)
    }

    fn checked_tenant(&self, tenant_id: &str) -> Result<TenantId, AdminError> {
        if tenant_id.is_empty() {
            return Err(AdminError::MissingTenantId);
        }
        if self.config.is_blocked(tenant_id) {
            warn!(tenant_id = %tenant_id, "Refusing operation on denylisted tenant");
            return Err(AdminError::InvalidTenantId);
        }
        Ok(TenantId::new(tenant_id))
    }
}
