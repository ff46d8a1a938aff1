//! OAuth2 access tokens for calls to the provider's management API.
//!
//! Resolution follows the usual application-default order: a service account
//! key file named by `GOOGLE_APPLICATION_CREDENTIALS`, otherwise the compute
//! metadata server. Tokens are fetched on every call.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ProviderFuture;
use super::{ProviderError, ProviderErrorKind};

/// Scope needed by the Identity Toolkit admin endpoints.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

pub const ENV_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// A bearer token for the management API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    /// Lifetime in seconds as reported by the issuer.
    pub expires_in: Option<u64>,
}

/// Something that can mint access tokens.
pub trait AccessTokenSource: Send + Sync {
    fn token(&self) -> Pin<Box<dyn Future<Output = Result<AccessToken, CredentialsError>> + Send + '_>>;

    /// Project the credentials belong to, when known.
    fn project_id(&self) -> Option<&str> {
        None
    }
}

/// Fields of a service account key file that are needed to mint tokens.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Service account credentials: signs a JWT assertion with the key file's
/// private key and exchanges it at the key file's token endpoint.
pub struct ServiceAccountCredentials {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    http: reqwest::Client,
}

impl ServiceAccountCredentials {
    pub fn from_key(http: reqwest::Client, key: ServiceAccountKey) -> Result<Self, CredentialsError> {
        if key.key_type != "service_account" {
            return Err(CredentialsError::InvalidKey(format!(
                "unsupported credential type '{}'",
                key.key_type
            )));
        }
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| CredentialsError::InvalidKey(e.to_string()))?;

        Ok(Self {
            key,
            encoding_key,
            scope: CLOUD_PLATFORM_SCOPE.to_string(),
            http,
        })
    }

    pub fn from_file(http: reqwest::Client, path: &Path) -> Result<Self, CredentialsError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CredentialsError::Io(format!("{}: {}", path.display(), e)))?;
        let key: ServiceAccountKey =
            serde_json::from_str(&raw).map_err(|e| CredentialsError::InvalidKey(e.to_string()))?;
        Self::from_key(http, key)
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    /// Build the signed assertion sent to the token endpoint.
    fn assertion(&self) -> Result<String, CredentialsError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| CredentialsError::InvalidKey(format!("signing assertion: {}", e)))
    }

    async fn exchange(&self) -> Result<AccessToken, CredentialsError> {
        let assertion = self.assertion()?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &assertion)
            .finish();

        debug!("Exchanging service account assertion for {}", self.key.client_email);

        let response = self
            .http
            .post(&self.key.token_uri)
            .header(http::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| CredentialsError::TokenEndpoint(e.to_string()))?;

        read_token_response(response).await
    }
}

impl AccessTokenSource for ServiceAccountCredentials {
    fn token(&self) -> Pin<Box<dyn Future<Output = Result<AccessToken, CredentialsError>> + Send + '_>> {
        Box::pin(self.exchange())
    }

    fn project_id(&self) -> Option<&str> {
        self.key.project_id.as_deref()
    }
}

/// Default service account of the compute instance the process runs on.
pub struct MetadataServerCredentials {
    token_url: String,
    http: reqwest::Client,
}

impl MetadataServerCredentials {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            token_url: METADATA_TOKEN_URL.to_string(),
            http,
        }
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    async fn fetch(&self) -> Result<AccessToken, CredentialsError> {
        let response = self
            .http
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| CredentialsError::TokenEndpoint(e.to_string()))?;

        read_token_response(response).await
    }
}

impl AccessTokenSource for MetadataServerCredentials {
    fn token(&self) -> Pin<Box<dyn Future<Output = Result<AccessToken, CredentialsError>> + Send + '_>> {
        Box::pin(self.fetch())
    }
}

/// A fixed token, for emulators and tests.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
    project_id: Option<String>,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            project_id: None,
        }
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

impl AccessTokenSource for StaticTokenSource {
    fn token(&self) -> Pin<Box<dyn Future<Output = Result<AccessToken, CredentialsError>> + Send + '_>> {
        let token = AccessToken {
            token: self.token.clone(),
            expires_in: None,
        };
        Box::pin(std::future::ready(Ok(token)))
    }

    fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }
}

async fn read_token_response(response: reqwest::Response) -> Result<AccessToken, CredentialsError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CredentialsError::TokenEndpoint(format!("[{}] {}", status, body)));
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| CredentialsError::TokenEndpoint(format!("invalid token response: {}", e)))?;

    Ok(AccessToken {
        token: parsed.access_token,
        expires_in: parsed.expires_in,
    })
}

/// Application-default credentials.
pub fn application_default(http: reqwest::Client) -> Result<Arc<dyn AccessTokenSource>, CredentialsError> {
    match std::env::var(ENV_APPLICATION_CREDENTIALS) {
        Ok(path) if !path.is_empty() => {
            let creds = ServiceAccountCredentials::from_file(http, Path::new(&path))?;
            debug!("Using service account credentials for {}", creds.client_email());
            Ok(Arc::new(creds))
        }
        _ => {
            debug!("No {} set, using metadata server credentials", ENV_APPLICATION_CREDENTIALS);
            Ok(Arc::new(MetadataServerCredentials::new(http)))
        }
    }
}

/// Errors raised while obtaining access tokens.
#[derive(Debug, Clone)]
pub enum CredentialsError {
    Io(String),
    InvalidKey(String),
    TokenEndpoint(String),
}

impl fmt::Display for CredentialsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "Failed to read credentials: {}", msg),
            Self::InvalidKey(msg) => write!(f, "Invalid credentials: {}", msg),
            Self::TokenEndpoint(msg) => write!(f, "Token endpoint error: {}", msg),
        }
    }
}

impl std::error::Error for CredentialsError {}

impl From<CredentialsError> for ProviderError {
    fn from(err: CredentialsError) -> Self {
        ProviderError::new(ProviderErrorKind::Unauthorized, err.to_string())
    }
}

/// Shorthand for provider calls that need a token first.
pub(crate) fn bearer<'a>(source: &'a dyn AccessTokenSource) -> ProviderFuture<'a, String> {
    Box::pin(async move { Ok(source.token().await?.token) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, routing::get};
    use std::io::Write;

    #[tokio::test]
    async fn test_static_token_source() {
        let source = StaticTokenSource::new("owner").with_project_id("demo");
        assert_eq!(source.token().await.unwrap().token, "owner");
        assert_eq!(source.project_id(), Some("demo"));
    }

    #[test]
    fn test_service_account_rejects_other_types() {
        let key = ServiceAccountKey {
            key_type: "authorized_user".to_string(),
            project_id: None,
            private_key_id: None,
            private_key: String::new(),
            client_email: "x@example.com".to_string(),
            token_uri: default_token_uri(),
        };
        let err = ServiceAccountCredentials::from_key(reqwest::Client::new(), key)
            .err()
            .unwrap();
        assert!(matches!(err, CredentialsError::InvalidKey(_)));
    }

    #[test]
    fn test_service_account_rejects_bad_pem() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"type":"service_account","project_id":"demo","private_key":"not a key","client_email":"sa@demo.iam.gserviceaccount.com"}}"#
        )
        .unwrap();

        let err = ServiceAccountCredentials::from_file(reqwest::Client::new(), file.path())
            .err()
            .unwrap();
        assert!(matches!(err, CredentialsError::InvalidKey(_)));
    }

    #[test]
    fn test_service_account_missing_file() {
        let err = ServiceAccountCredentials::from_file(
            reqwest::Client::new(),
            Path::new("/nonexistent/key.json"),
        )
        .err()
        .unwrap();
        assert!(matches!(err, CredentialsError::Io(_)));
    }

    #[tokio::test]
    async fn test_metadata_server_sends_flavor_header() {
        let app = Router::new().route(
            "/token",
            get(|headers: HeaderMap| async move {
                let flavor = headers
                    .get("Metadata-Flavor")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                Json(serde_json::json!({
                    "access_token": format!("tok-{}", flavor),
                    "expires_in": 3599,
                    "token_type": "Bearer"
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let creds = MetadataServerCredentials::new(reqwest::Client::new())
            .with_token_url(format!("http://{}/token", addr));
        let token = creds.token().await.unwrap();
        assert_eq!(token.token, "tok-Google");
        assert_eq!(token.expires_in, Some(3599));
    }

    #[test]
    fn test_credentials_error_into_provider_error() {
        let err: ProviderError = CredentialsError::TokenEndpoint("[401] nope".to_string()).into();
        assert_eq!(err.kind(), ProviderErrorKind::Unauthorized);
        assert!(err.message().contains("nope"));
    }
}
