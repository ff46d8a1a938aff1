//! Signing-key set used to check ID token signatures.
//!
//! The provider publishes its ID token signing keys as a JWKS document and
//! rotates them every few hours. Keys are kept for [`DEFAULT_CACHE_TTL_SECONDS`]
//! and refetched on expiry. A token naming an unknown `kid` triggers at most
//! one refetch per [`MIN_REFETCH_INTERVAL_SECONDS`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// JWKS endpoint for ID tokens minted by the provider's token service.
pub const DEFAULT_SIGNING_KEYS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Default cache TTL in seconds (1 hour).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;

/// Shortest gap between fetches triggered by an unknown `kid`.
pub const MIN_REFETCH_INTERVAL_SECONDS: u64 = 60;

/// Maximum stale cache age in seconds (24 hours).
pub const MAX_STALE_CACHE_SECONDS: u64 = 86400;

/// A single JSON Web Key from a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Key ID, matched against the JWT header `kid`
    pub kid: Option<String>,
    pub alg: Option<String>,
    /// Key use (e.g., "sig" for signature)
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    pub e: Option<String>,
}

/// A JWKS document containing multiple keys.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// Thread-safe signing-key cache with automatic refresh.
///
/// Stale keys are served when a refresh fails, up to
/// [`MAX_STALE_CACHE_SECONDS`] after the last successful fetch.
pub struct SigningKeyCache {
    keys_url: String,
    cache_ttl: Duration,
    min_refetch_interval: Duration,
    keys: Arc<RwLock<HashMap<String, DecodingKey>>>,
    last_fetch: Arc<RwLock<Option<Instant>>>,
    /// Serializes refreshes so concurrent misses share one fetch.
    fetch_lock: Mutex<()>,
    client: reqwest::Client,
}

impl SigningKeyCache {
    pub fn new(client: reqwest::Client, keys_url: impl Into<String>) -> Self {
        Self {
            keys_url: keys_url.into(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            min_refetch_interval: Duration::from_secs(MIN_REFETCH_INTERVAL_SECONDS),
            keys: Arc::new(RwLock::new(HashMap::new())),
            last_fetch: Arc::new(RwLock::new(None)),
            fetch_lock: Mutex::new(()),
            client,
        }
    }

    /// Get the decoding key for `kid`.
    ///
    /// Fetches from the endpoint if the cache has expired, or if the key is
    /// unknown and the last fetch is older than [`MIN_REFETCH_INTERVAL_SECONDS`].
    pub async fn get_key(&self, kid: &str) -> Result<DecodingKey, SigningKeyError> {
        let age = self.last_fetch_age().await;
        if age.is_some_and(|a| a <= self.cache_ttl) {
            if let Some(key) = self.get_from_cache(kid).await {
                return Ok(key);
            }
            if self.recently_fetched(age) {
                debug!(kid, "Unknown signing key, refetch throttled");
                return Err(SigningKeyError::KeyNotFound(kid.to_string()));
            }
        }

        let _guard = self.fetch_lock.lock().await;

        // Another task may have refreshed while we waited for the lock.
        if self.recently_fetched(self.last_fetch_age().await) {
            return self
                .get_from_cache(kid)
                .await
                .ok_or_else(|| SigningKeyError::KeyNotFound(kid.to_string()));
        }

        match self.fetch_keys().await {
            Ok(()) => self
                .get_from_cache(kid)
                .await
                .ok_or_else(|| SigningKeyError::KeyNotFound(kid.to_string())),
            Err(e) => {
                let stale_ok = self
                    .last_fetch_age()
                    .await
                    .is_some_and(|a| a < Duration::from_secs(MAX_STALE_CACHE_SECONDS));

                if stale_ok {
                    warn!("Signing key fetch failed, using stale cache: {}", e);
                    if let Some(key) = self.get_from_cache(kid).await {
                        return Ok(key);
                    }
                }

                Err(e)
            }
        }
    }

    async fn last_fetch_age(&self) -> Option<Duration> {
        self.last_fetch.read().await.map(|t| t.elapsed())
    }

    fn recently_fetched(&self, age: Option<Duration>) -> bool {
        age.is_some_and(|a| a < self.min_refetch_interval)
    }

    async fn get_from_cache(&self, kid: &str) -> Option<DecodingKey> {
        self.keys.read().await.get(kid).cloned()
    }

    /// Fetch keys from the JWKS endpoint, replacing the cached set.
    async fn fetch_keys(&self) -> Result<(), SigningKeyError> {
        debug!("Fetching signing keys from {}", self.keys_url);

        let response = self
            .client
            .get(&self.keys_url)
            .send()
            .await
            .map_err(|e| SigningKeyError::FetchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SigningKeyError::FetchError(format!(
                "HTTP {} from signing key endpoint",
                response.status()
            )));
        }

        let jwks: JwksDocument = response
            .json()
            .await
            .map_err(|e| SigningKeyError::ParseError(e.to_string()))?;

        let new_keys = Self::decode_document(jwks);
        if new_keys.is_empty() {
            return Err(SigningKeyError::NoValidKeys);
        }

        let count = new_keys.len();
        *self.keys.write().await = new_keys;
        *self.last_fetch.write().await = Some(Instant::now());

        debug!("Cached {} signing keys", count);
        Ok(())
    }

    /// Keep the RSA signature keys that carry a `kid`.
    fn decode_document(jwks: JwksDocument) -> HashMap<String, DecodingKey> {
        let mut keys = HashMap::new();

        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                debug!("Skipping non-RSA key: {:?}", jwk.kty);
                continue;
            }
            if jwk.key_use.as_deref() == Some("enc") {
                continue;
            }
            let Some(kid) = jwk.kid.clone() else {
                debug!("Skipping key without kid");
                continue;
            };

            match Self::jwk_to_decoding_key(&jwk) {
                Ok(decoding_key) => {
                    keys.insert(kid, decoding_key);
                }
                Err(e) => warn!("Failed to parse JWK {}: {}", kid, e),
            }
        }

        keys
    }

    fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, SigningKeyError> {
        let n = jwk
            .n
            .as_ref()
            .ok_or_else(|| SigningKeyError::ParseError("Missing 'n' in RSA key".to_string()))?;
        let e = jwk
            .e
            .as_ref()
            .ok_or_else(|| SigningKeyError::ParseError("Missing 'e' in RSA key".to_string()))?;

        DecodingKey::from_rsa_components(n, e)
            .map_err(|e| SigningKeyError::ParseError(format!("Invalid RSA components: {}", e)))
    }

}

/// Errors that can occur when loading signing keys.
#[derive(Debug, Clone)]
pub enum SigningKeyError {
    FetchError(String),
    ParseError(String),
    NoValidKeys,
    /// The token names a key the endpoint does not publish.
    KeyNotFound(String),
}

impl fmt::Display for SigningKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchError(msg) => write!(f, "Failed to fetch signing keys: {}", msg),
            Self::ParseError(msg) => write!(f, "Failed to parse signing keys: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in signing key set"),
            Self::KeyNotFound(kid) => write!(f, "Signing key not found: {}", kid),
        }
    }
}

impl std::error::Error for SigningKeyError {}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const MODULUS: &str = "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw";

    /// Serve `doc` on loopback, counting requests.
    async fn serve_jwks(doc: serde_json::Value) -> (String, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let counter = fetches.clone();
        let app = Router::new().route(
            "/jwks",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let doc = doc.clone();
                async move { Json(doc) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/jwks", addr), fetches)
    }

    fn one_key() -> serde_json::Value {
        serde_json::json!({
            "keys": [{"kty": "RSA", "kid": "k1", "alg": "RS256", "n": MODULUS, "e": "AQAB"}]
        })
    }

    #[test]
    fn test_signing_key_error_display() {
        let err = SigningKeyError::FetchError("timeout".to_string());
        assert_eq!(err.to_string(), "Failed to fetch signing keys: timeout");

        let err = SigningKeyError::KeyNotFound("key123".to_string());
        assert_eq!(err.to_string(), "Signing key not found: key123");
    }

    #[test]
    fn test_decode_document_filters_keys() {
        let doc: JwksDocument = serde_json::from_value(serde_json::json!({
            "keys": [
                {"kty": "RSA", "kid": "k1", "use": "sig", "n": MODULUS, "e": "AQAB"},
                {"kty": "RSA", "n": MODULUS, "e": "AQAB"},
                {"kty": "EC", "kid": "k2"},
                {"kty": "RSA", "kid": "k3", "use": "enc", "n": MODULUS, "e": "AQAB"},
                {"kty": "RSA", "kid": "k4", "e": "AQAB"}
            ]
        }))
        .unwrap();

        let keys = SigningKeyCache::decode_document(doc);
        assert_eq!(keys.len(), 1);
        assert!(keys.contains_key("k1"));
    }

    #[tokio::test]
    async fn test_get_key_fetches_once() {
        let (url, fetches) = serve_jwks(one_key()).await;
        let cache = SigningKeyCache::new(reqwest::Client::new(), url);

        assert!(cache.get_key("k1").await.is_ok());
        assert!(cache.get_key("k1").await.is_ok());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let missing = cache.get_key("nope").await;
        assert!(matches!(missing, Err(SigningKeyError::KeyNotFound(k)) if k == "nope"));
    }

    #[tokio::test]
    async fn test_unknown_kids_do_not_refetch() {
        let (url, fetches) = serve_jwks(one_key()).await;
        let cache = SigningKeyCache::new(reqwest::Client::new(), url);

        assert!(cache.get_key("k1").await.is_ok());
        for i in 0..20 {
            let kid = format!("bogus-{}", i);
            assert!(matches!(
                cache.get_key(&kid).await,
                Err(SigningKeyError::KeyNotFound(_))
            ));
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let (url, fetches) = serve_jwks(one_key()).await;
        let cache = Arc::new(SigningKeyCache::new(reqwest::Client::new(), url));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_key("k1").await.is_ok() })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_document_is_error() {
        let (url, _) = serve_jwks(serde_json::json!({"keys": []})).await;
        let cache = SigningKeyCache::new(reqwest::Client::new(), url);

        assert!(matches!(
            cache.get_key("k1").await,
            Err(SigningKeyError::NoValidKeys)
        ));
    }
}
