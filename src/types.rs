//! NewType wrappers for the identifiers that flow between the middleware,
//! the admin operations and the identity provider.
//!
//! Keeping project, tenant and user ids apart stops a uid from being passed
//! where a tenant id is expected (both are plain strings on the wire).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is the empty string.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Google Cloud project that owns the identity pools.
    ///
    /// Used as the token audience, in the issuer URL, and as the first path
    /// segment of every Identity Toolkit REST call.
    ProjectId
);

newtype_string!(
    /// Identifier of a provider-managed tenant (an isolated identity pool).
    ///
    /// An empty value means "no tenant": requests and users then live in the
    /// project-level pool.
    TenantId
);

newtype_string!(
    /// Provider-assigned user identifier (the `uid` / `sub` claim).
    UserId
);
