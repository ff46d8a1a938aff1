//! Request authentication against the identity provider.
//!
//! Every protected request goes through one linear decision procedure:
//!
//! 1. Take the bearer token from `Authorization`; none means `MISSING_AUTH_TOKEN`
//! 2. Pick the verifying identity pool:
//!    - the pinned tenant's client, when one was bound at startup
//!    - the project-level client, when tenant enforcement is off
//!    - otherwise the tenant named by `X-Tenant-Id`, which must be present
//!      (`MISSING_TENANT_ID`), not denylisted and resolvable (`INVALID_TENANT_ID`)
//! 3. Verify the token; expiry maps to `EXPIRED_AUTH_TOKEN`, anything else to
//!    `INVALID_AUTH_TOKEN`
//! 4. Store the resulting [`AuthenticatedUser`] in the request extensions
//!
//! All rejections are HTTP 401 with a JSON body.
//!
//! ## Usage
//!
//! ```ignore
//! let authenticator = Arc::new(TokenAuthenticator::new(config, clients));
//!
//! let router = Router::new()
//!     .route("/me", get(|user: AuthenticatedUser| async move { Json(user) }))
//!     .layer(middleware::from_fn_with_state(authenticator, require_auth));
//! ```

mod context;
mod extractor;
mod rejection;
mod resolver;


pub use context::AuthenticatedUser;
pub use extractor::{TENANT_ID_HEADER, TokenAuthenticator, bearer_token, require_auth};
pub use rejection::{AuthRejection, RejectionCode};
pub use resolver::select_verifier;
