//! Tenant-aware user administration.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clients::ProviderClients;
use crate::config::TenancyConfig;
use crate::error::AdminError;
use crate::provider::{IdentityClient, UserRecord, UserToCreate, UserToUpdate};
use crate::types::{TenantId, UserId};

/// Creates, updates and deletes provider-managed users.
///
/// Every operation takes an optional tenant id (empty for none) and picks
/// the identity pool the same way:
///
/// 1. a non-empty tenant id must not be denylisted and must resolve
/// 2. otherwise the pinned tenant's client, if one is bound
/// 3. otherwise the project-level client, if enforcement is off
/// 4. otherwise [`AdminError::MissingTenantId`]
///
/// Provider errors are returned unchanged as [`AdminError::Provider`].
#[derive(Clone)]
pub struct UserManager {
    config: Arc<TenancyConfig>,
    clients: Arc<ProviderClients>,
}

impl UserManager {
    pub fn new(config: Arc<TenancyConfig>, clients: Arc<ProviderClients>) -> Self {
        Self { config, clients }
    }

    pub async fn create_user(
        &self,
        user: &UserToCreate,
        tenant_id: &str,
    ) -> Result<UserRecord, AdminError> {
        let client = self.client_for(tenant_id)?;
        let record = client.create_user(user).await?;
        info!(uid = %record.uid, tenant_id = %tenant_id, "User created");
        Ok(record)
    }

    pub async fn update_user(
        &self,
        uid: &UserId,
        update: &UserToUpdate,
        tenant_id: &str,
    ) -> Result<UserRecord, AdminError> {
        let client = self.client_for(tenant_id)?;
        let record = client.update_user(uid, update).await?;
        info!(uid = %uid, tenant_id = %tenant_id, "User updated");
        Ok(record)
    }

    pub async fn delete_user(&self, uid: &UserId, tenant_id: &str) -> Result<(), AdminError> {
        let client = self.client_for(tenant_id)?;
        client.delete_user(uid).await?;
        info!(uid = %uid, tenant_id = %tenant_id, "User deleted");
        Ok(())
    }

    fn client_for(&self, tenant_id: &str) -> Result<Arc<dyn IdentityClient>, AdminError> {
        if !tenant_id.is_empty() {
            if self.config.is_blocked(tenant_id) {
                warn!(tenant_id = %tenant_id, "Refusing user operation on denylisted tenant");
                return Err(AdminError::InvalidTenantId);
            }
            return self
                .clients
                .tenants()
                .auth_for_tenant(&TenantId::new(tenant_id))
                .map_err(|e| {
                    warn!(tenant_id = %tenant_id, "Error getting tenant client: {}", e);
                    AdminError::InvalidTenantId
                });
        }

        if let Some(pinned) = self.clients.pinned() {
            return Ok(pinned.clone());
        }

        if !self.config.enforce_tenant() {
            return Ok(self.clients.base().clone());
        }

        Err(AdminError::MissingTenantId)
    }
}
