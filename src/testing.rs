//! In-memory provider fakes shared by the unit tests.

#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::json;

use crate::clients::ProviderClients;
use crate::config::TenancyConfig;
use crate::provider::credentials::StaticTokenSource;
use crate::provider::{
    IdentityClient, ProviderError, ProviderErrorKind, ProviderFuture, Tenant, TenantManager,
    TenantToCreate, TenantToUpdate, UserRecord, UserToCreate, UserToUpdate, VerifiedToken,
};
use crate::types::{TenantId, UserId};

#[derive(Default)]
struct FakeState {
    tokens: HashMap<String, Result<VerifiedToken, ProviderError>>,
    unresolvable: HashSet<String>,
    calls: Vec<String>,
}

/// A fake identity provider that records every call made against it.
///
/// Calls are logged as `"{operation}@{pool}"` for client operations (pool is
/// `base` or the tenant id) and `"{operation}:{tenant}"` for tenant ones.
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` and return `claims` for it.
    pub fn with_token(self, token: &str, claims: VerifiedToken) -> Self {
        self.state.lock().unwrap().tokens.insert(token.to_string(), Ok(claims));
        self
    }

    /// Fail verification of `token` with `error`.
    pub fn with_token_error(self, token: &str, error: ProviderError) -> Self {
        self.state.lock().unwrap().tokens.insert(token.to_string(), Err(error));
        self
    }

    /// Make tenant-client resolution fail for `tenant_id`.
    pub fn failing_resolution(self, tenant_id: &str) -> Self {
        self.state.lock().unwrap().unresolvable.insert(tenant_id.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn base_client(&self) -> FakeIdentityClient {
        FakeIdentityClient {
            tenant_id: None,
            state: self.state.clone(),
        }
    }

    pub fn tenant_manager(&self) -> FakeTenantManager {
        FakeTenantManager {
            state: self.state.clone(),
        }
    }

    /// A full client set wired to this fake, pinned per `config`.
    pub fn clients(&self, config: &TenancyConfig) -> ProviderClients {
        ProviderClients::new(
            Arc::new(self.base_client()),
            Arc::new(self.tenant_manager()),
            Arc::new(StaticTokenSource::new("fake-access-token")),
        )
        .bind_pinned_tenant(config)
        .unwrap()
    }
}

fn record(state: &Mutex<FakeState>, call: String) {
    state.lock().unwrap().calls.push(call);
}

pub struct FakeIdentityClient {
    tenant_id: Option<TenantId>,
    state: Arc<Mutex<FakeState>>,
}

impl FakeIdentityClient {
    fn pool(&self) -> &str {
        self.tenant_id.as_ref().map(TenantId::as_str).unwrap_or("base")
    }

    fn verify(&self, id_token: &str) -> Result<VerifiedToken, ProviderError> {
        record(&self.state, format!("verify@{}", self.pool()));

        let outcome = self.state.lock().unwrap().tokens.get(id_token).cloned();
        let token = outcome.unwrap_or_else(|| {
            Err(ProviderError::new(
                ProviderErrorKind::InvalidIdToken,
                "Failed to verify ID token: InvalidSignature",
            ))
        })?;

        if let Some(bound) = &self.tenant_id {
            if &token.tenant_id != bound {
                return Err(ProviderError::new(
                    ProviderErrorKind::TenantIdMismatch,
                    "Invalid tenant id",
                ));
            }
        }
        Ok(token)
    }

    fn record_for(&self, uid: UserId, email: Option<String>) -> UserRecord {
        UserRecord {
            uid,
            email,
            tenant_id: self.tenant_id.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

impl IdentityClient for FakeIdentityClient {
    fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    fn verify_id_token<'a>(&'a self, id_token: &'a str) -> ProviderFuture<'a, VerifiedToken> {
        Box::pin(std::future::ready(self.verify(id_token)))
    }

    fn create_user<'a>(&'a self, user: &'a UserToCreate) -> ProviderFuture<'a, UserRecord> {
        record(&self.state, format!("create_user@{}", self.pool()));
        let uid = user.uid.clone().unwrap_or_else(|| UserId::new("generated-uid"));
        Box::pin(std::future::ready(Ok(self.record_for(uid, user.email.clone()))))
    }

    fn update_user<'a>(&'a self, uid: &'a UserId, update: &'a UserToUpdate) -> ProviderFuture<'a, UserRecord> {
        record(&self.state, format!("update_user@{}", self.pool()));
        Box::pin(std::future::ready(Ok(self.record_for(uid.clone(), update.email.clone()))))
    }

    fn delete_user<'a>(&'a self, uid: &'a UserId) -> ProviderFuture<'a, ()> {
        record(&self.state, format!("delete_user@{}", self.pool()));
        let result = if uid.as_str() == "ghost" {
            Err(ProviderError::new(ProviderErrorKind::UserNotFound, "USER_NOT_FOUND"))
        } else {
            Ok(())
        };
        Box::pin(std::future::ready(result))
    }
}

pub struct FakeTenantManager {
    state: Arc<Mutex<FakeState>>,
}

impl TenantManager for FakeTenantManager {
    fn auth_for_tenant(&self, tenant_id: &TenantId) -> Result<Arc<dyn IdentityClient>, ProviderError> {
        record(&self.state, format!("resolve:{}", tenant_id));
        if self.state.lock().unwrap().unresolvable.contains(tenant_id.as_str()) {
            return Err(ProviderError::new(
                ProviderErrorKind::InvalidTenantId,
                format!("Invalid tenant id: '{}'", tenant_id),
            ));
        }
        Ok(Arc::new(FakeIdentityClient {
            tenant_id: Some(tenant_id.clone()),
            state: self.state.clone(),
        }))
    }

    fn create_tenant<'a>(&'a self, tenant: &'a TenantToCreate) -> ProviderFuture<'a, Tenant> {
        record(&self.state, "create_tenant".to_string());
        let created = Tenant {
            id: TenantId::new("t-new-0001"),
            display_name: tenant.display_name.clone().unwrap_or_default(),
            ..Default::default()
        };
        Box::pin(std::future::ready(Ok(created)))
    }

    fn update_tenant<'a>(&'a self, tenant_id: &'a TenantId, update: &'a TenantToUpdate) -> ProviderFuture<'a, Tenant> {
        record(&self.state, format!("update_tenant:{}", tenant_id));
        let updated = Tenant {
            id: tenant_id.clone(),
            display_name: update.display_name.clone().unwrap_or_default(),
            ..Default::default()
        };
        Box::pin(std::future::ready(Ok(updated)))
    }

    fn delete_tenant<'a>(&'a self, tenant_id: &'a TenantId) -> ProviderFuture<'a, ()> {
        record(&self.state, format!("delete_tenant:{}", tenant_id));
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Claims for a verified token of `uid` in `tenant` (empty for none).
pub fn verified(uid: &str, email: &str, tenant: &str) -> VerifiedToken {
    let claims = json!({
        "sub": uid,
        "email": email,
        "email_verified": true,
        "auth_time": 1_700_000_000,
        "firebase": {"tenant": tenant},
    });
    VerifiedToken {
        uid: UserId::new(uid),
        auth_time: 1_700_000_000,
        issued_at: 1_700_000_100,
        expires_at: 1_700_003_700,
        tenant_id: TenantId::new(tenant),
        claims: claims.as_object().cloned().unwrap_or_default(),
    }
}
