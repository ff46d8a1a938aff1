//! The process-wide set of provider clients.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use url::Url;

use crate::config::TenancyConfig;
use crate::provider::credentials::AccessTokenSource;
use crate::provider::identity_toolkit::{DEFAULT_API_BASE, IdentityToolkitClient};
use crate::provider::signing_keys::{DEFAULT_SIGNING_KEYS_URL, SigningKeyCache};
use crate::provider::{IdentityClient, ProviderError, TenantManager};

/// Default timeout for outbound provider calls.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Endpoints and limits used to build the production clients.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_base: Url,
    pub signing_keys_url: String,
    pub timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            signing_keys_url: DEFAULT_SIGNING_KEYS_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS),
        }
    }
}

/// Parsed [`DEFAULT_API_BASE`].
pub fn default_api_base() -> Url {
    Url::parse(DEFAULT_API_BASE).expect("Invalid default API base URL")
}

/// Handles to the identity provider.
///
/// Built once at startup and read-only afterwards. Holds the project-level
/// client, the optional client pre-bound to the pinned tenant, the tenant
/// manager used to resolve per-request tenant clients, and the credentials
/// and HTTP client used for direct REST calls.
pub struct ProviderClients {
    base: Arc<dyn IdentityClient>,
    pinned: Option<Arc<dyn IdentityClient>>,
    tenants: Arc<dyn TenantManager>,
    credentials: Arc<dyn AccessTokenSource>,
    http: reqwest::Client,
    api_base: Url,
}

impl ProviderClients {
    pub fn new(
        base: Arc<dyn IdentityClient>,
        tenants: Arc<dyn TenantManager>,
        credentials: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            base,
            pinned: None,
            tenants,
            credentials,
            http: reqwest::Client::new(),
            api_base: default_api_base(),
        }
    }

    /// Use this HTTP client and API base for direct REST calls.
    pub fn with_rest_endpoint(mut self, http: reqwest::Client, api_base: Url) -> Self {
        self.http = http;
        self.api_base = api_base;
        self
    }

    /// Pre-bind a client for the configured pinned tenant, if any.
    pub fn bind_pinned_tenant(mut self, config: &TenancyConfig) -> Result<Self, ProviderError> {
        if let Some(tenant_id) = config.pinned_tenant() {
            self.pinned = Some(self.tenants.auth_for_tenant(tenant_id)?);
        }
        Ok(self)
    }

    /// Build the production client set.
    ///
    /// Any failure here is fatal: the process must not serve traffic
    /// without a working provider connection.
    pub fn initialize(
        config: &TenancyConfig,
        credentials: Arc<dyn AccessTokenSource>,
        options: ClientOptions,
    ) -> Result<Self> {
        info!("Initializing identity provider clients for project {}", config.project_id());
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let signing_keys = Arc::new(SigningKeyCache::new(http.clone(), options.signing_keys_url));
        let base = IdentityToolkitClient::new(
            http.clone(),
            options.api_base.clone(),
            config.project_id().clone(),
            credentials.clone(),
            signing_keys,
        );
        let tenants = base.tenant_manager();
        info!("Auth client initialized");

        let clients = Self::new(Arc::new(base), Arc::new(tenants), credentials)
            .with_rest_endpoint(http, options.api_base)
            .bind_pinned_tenant(config)
            .context("Failed to initialize tenant auth client")?;

        if let Some(tenant_id) = config.pinned_tenant() {
            info!("Tenant auth client initialized for tenant {}", tenant_id);
        }

        Ok(clients)
    }

    /// Project-level client.
    pub fn base(&self) -> &Arc<dyn IdentityClient> {
        &self.base
    }

    /// Client bound to the pinned tenant.
    pub fn pinned(&self) -> Option<&Arc<dyn IdentityClient>> {
        self.pinned.as_ref()
    }

    pub fn tenants(&self) -> &Arc<dyn TenantManager> {
        &self.tenants
    }

    pub fn credentials(&self) -> &Arc<dyn AccessTokenSource> {
        &self.credentials
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn api_base(&self) -> &Url {
        &self.api_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::credentials::StaticTokenSource;
    use crate::testing::FakeProvider;
    use crate::types::TenantId;

    #[test]
    fn test_pinned_client_only_with_enforcement() {
        let provider = FakeProvider::new();

        let config = TenancyConfig::new("demo").with_tenant_id("t-pin");
        let clients = provider.clients(&config);
        assert!(clients.pinned().is_none());

        let config = config.with_enforce_tenant(true);
        let clients = provider.clients(&config);
        let pinned = clients.pinned().unwrap();
        assert_eq!(pinned.tenant_id().map(TenantId::as_str), Some("t-pin"));
        assert_eq!(provider.calls(), vec!["resolve:t-pin"]);
    }

    #[test]
    fn test_pinned_resolution_failure_is_error() {
        let provider = FakeProvider::new().failing_resolution("t-pin");
        let config = TenancyConfig::new("demo")
            .with_enforce_tenant(true)
            .with_tenant_id("t-pin");

        let result = ProviderClients::new(
            Arc::new(provider.base_client()),
            Arc::new(provider.tenant_manager()),
            Arc::new(StaticTokenSource::new("t")),
        )
        .bind_pinned_tenant(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_initialize_requires_project() {
        let result = ProviderClients::initialize(
            &TenancyConfig::default(),
            Arc::new(StaticTokenSource::new("t")),
            ClientOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_initialize_pins_tenant() {
        let config = TenancyConfig::new("demo")
            .with_enforce_tenant(true)
            .with_tenant_id("t-pin");
        let clients = ProviderClients::initialize(
            &config,
            Arc::new(StaticTokenSource::new("t")),
            ClientOptions::default(),
        )
        .unwrap();

        assert!(clients.base().tenant_id().is_none());
        assert_eq!(
            clients.pinned().and_then(|c| c.tenant_id()).map(TenantId::as_str),
            Some("t-pin")
        );
        assert_eq!(clients.api_base().as_str(), "https://identitytoolkit.googleapis.com/");
    }
}
