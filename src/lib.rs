// Core modules
pub mod config;
pub mod types;
pub mod error;
pub mod provider;
pub mod clients;

// Request authentication and administration
pub mod auth;
pub mod users;
pub mod tenants;
pub mod api;

#[cfg(test)]
mod testing;

// Re-export key types and functions
pub use config::{ConfigError, TenancyConfig, parse_tenant_list};
pub use types::{ProjectId, TenantId, UserId};
pub use error::AdminError;
pub use clients::{ClientOptions, DEFAULT_HTTP_TIMEOUT_SECONDS, ProviderClients};
pub use provider::credentials::{AccessTokenSource, StaticTokenSource, application_default};
pub use provider::identity_toolkit::DEFAULT_API_BASE;
pub use provider::signing_keys::DEFAULT_SIGNING_KEYS_URL;
pub use provider::{
    IdentityClient, ProviderError, ProviderErrorKind, Tenant, TenantManager, TenantToCreate,
    TenantToUpdate, UserRecord, UserToCreate, UserToUpdate, VerifiedToken,
};

pub use auth::{AuthRejection, AuthenticatedUser, RejectionCode, TokenAuthenticator, require_auth};
pub use users::UserManager;
pub use tenants::{TenantAdmin, TenantInheritanceConfig};
pub use api::AppState;
