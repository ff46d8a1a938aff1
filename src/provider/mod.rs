//! Identity provider client interface.
//!
//! Everything that actually talks to the provider sits behind two traits:
//!
//! - [`IdentityClient`]: token verification and user CRUD for one identity
//!   pool (the project-level pool or a single tenant's pool)
//! - [`TenantManager`]: tenant CRUD and resolution of tenant-scoped clients
//!
//! The middleware and the admin operations only pick *which* client to use;
//! results and errors coming back from a client are passed through as-is.
//! [`identity_toolkit`] holds the REST implementation used in production.

pub mod credentials;
pub mod identity_toolkit;
mod models;
pub mod signing_keys;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::types::{TenantId, UserId};

pub use models::{Tenant, TenantToCreate, TenantToUpdate, UserRecord, UserToCreate, UserToUpdate, VerifiedToken};

/// Text the provider puts in verification errors for expired tokens.
///
/// Only used as a fallback when an error did not come with
/// [`ProviderErrorKind::IdTokenExpired`].
pub const ID_TOKEN_EXPIRED_MESSAGE: &str = "ID token has expired";

/// Boxed future returned by the provider traits so they stay object safe.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Operations bound to a single identity pool.
pub trait IdentityClient: Send + Sync {
    /// Tenant this client is bound to, `None` for the project-level pool.
    fn tenant_id(&self) -> Option<&TenantId>;

    /// Verify an ID token and return its claims.
    fn verify_id_token<'a>(&'a self, id_token: &'a str) -> ProviderFuture<'a, VerifiedToken>;

    fn create_user<'a>(&'a self, user: &'a UserToCreate) -> ProviderFuture<'a, UserRecord>;

    fn update_user<'a>(
        &'a self,
        uid: &'a UserId,
        update: &'a UserToUpdate,
    ) -> ProviderFuture<'a, UserRecord>;

    fn delete_user<'a>(&'a self, uid: &'a UserId) -> ProviderFuture<'a, ()>;
}

/// Tenant administration for a project.
pub trait TenantManager: Send + Sync {
    /// Resolve a client scoped to `tenant_id`.
    ///
    /// This does not round-trip to the provider; it fails only for ids the
    /// provider could never accept.
    fn auth_for_tenant(&self, tenant_id: &TenantId) -> Result<Arc<dyn IdentityClient>, ProviderError>;

    fn create_tenant<'a>(&'a self, tenant: &'a TenantToCreate) -> ProviderFuture<'a, Tenant>;

    fn update_tenant<'a>(
        &'a self,
        tenant_id: &'a TenantId,
        update: &'a TenantToUpdate,
    ) -> ProviderFuture<'a, Tenant>;

    fn delete_tenant<'a>(&'a self, tenant_id: &'a TenantId) -> ProviderFuture<'a, ()>;
}

/// Broad classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The ID token's `exp` is in the past.
    IdTokenExpired,
    /// Malformed token, bad signature, wrong issuer/audience, missing claims.
    InvalidIdToken,
    /// Token was issued for a different tenant than the verifying client.
    TenantIdMismatch,
    /// Signing keys could not be fetched or parsed.
    SigningKeys,
    InvalidTenantId,
    UserNotFound,
    TenantNotFound,
    EmailAlreadyExists,
    UidAlreadyExists,
    InvalidArgument,
    /// Credentials were rejected by the provider.
    Unauthorized,
    /// The request never produced a response.
    Transport,
    Unexpected,
}

/// Error returned by [`IdentityClient`] and [`TenantManager`] implementations.
#[derive(Debug, Clone)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether this error means the token verified but has expired.
    ///
    /// Checks the structured kind first and falls back to the provider's
    /// message text for errors that lost their kind along the way.
    pub fn is_id_token_expired(&self) -> bool {
        self.kind == ProviderErrorKind::IdTokenExpired
            || self.message.contains(ID_TOKEN_EXPIRED_MESSAGE)
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(ProviderErrorKind::Transport, err.to_string())
    }
}
