//! Identity Toolkit REST implementation of the provider traits.
//!
//! User operations go to `v1/projects/{project}[/tenants/{tenant}]/accounts*`,
//! tenant operations to `v2/projects/{project}/tenants`. ID tokens are checked
//! locally against the provider's published signing keys.

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;
use url::Url;

use super::credentials::{AccessTokenSource, bearer};
use super::signing_keys::SigningKeyCache;
use super::{
    ID_TOKEN_EXPIRED_MESSAGE, IdentityClient, ProviderError, ProviderErrorKind, ProviderFuture, Tenant, TenantManager,
    TenantToCreate, TenantToUpdate, UserRecord, UserToCreate, UserToUpdate, VerifiedToken,
};
use crate::types::{ProjectId, TenantId, UserId};

/// Production endpoint of the Identity Toolkit API.
pub const DEFAULT_API_BASE: &str = "https://identitytoolkit.googleapis.com";

const TOKEN_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// Longest `sub` the provider issues.
const MAX_UID_LENGTH: usize = 128;

struct ToolkitShared {
    http: reqwest::Client,
    api_base: Url,
    project_id: ProjectId,
    credentials: Arc<dyn AccessTokenSource>,
    signing_keys: Arc<SigningKeyCache>,
}

/// Client for one identity pool of a project.
///
/// Cloning is cheap; tenant-bound clients share the HTTP client, credentials
/// and signing keys of the client they were derived from.
#[derive(Clone)]
pub struct IdentityToolkitClient {
    shared: Arc<ToolkitShared>,
    tenant_id: Option<TenantId>,
}

impl IdentityToolkitClient {
    pub fn new(
        http: reqwest::Client,
        api_base: Url,
        project_id: ProjectId,
        credentials: Arc<dyn AccessTokenSource>,
        signing_keys: Arc<SigningKeyCache>,
    ) -> Self {
        Self {
            shared: Arc::new(ToolkitShared {
                http,
                api_base,
                project_id,
                credentials,
                signing_keys,
            }),
            tenant_id: None,
        }
    }

    /// A client bound to `tenant_id`'s pool.
    pub fn for_tenant(&self, tenant_id: TenantId) -> Self {
        Self {
            shared: self.shared.clone(),
            tenant_id: Some(tenant_id),
        }
    }

    /// Tenant administration for the same project.
    pub fn tenant_manager(&self) -> ToolkitTenantManager {
        ToolkitTenantManager {
            client: Self {
                shared: self.shared.clone(),
                tenant_id: None,
            },
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.shared.project_id
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.shared.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ProviderError::new(
                    ProviderErrorKind::Unexpected,
                    format!("API base URL cannot take a path: {}", self.shared.api_base),
                )
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `v1/projects/{project}[/tenants/{tenant}]/{resource}`
    fn accounts_url(&self, resource: &str) -> Result<Url, ProviderError> {
        let project = self.shared.project_id.as_str();
        match &self.tenant_id {
            Some(tenant) => self.endpoint(&["v1", "projects", project, "tenants", tenant.as_str(), resource]),
            None => self.endpoint(&["v1", "projects", project, resource]),
        }
    }

    fn tenants_url(&self, tenant_id: Option<&TenantId>) -> Result<Url, ProviderError> {
        let project = self.shared.project_id.as_str();
        match tenant_id {
            Some(tenant) => self.endpoint(&["v2", "projects", project, "tenants", tenant.as_str()]),
            None => self.endpoint(&["v2", "projects", project, "tenants"]),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<Value>,
    ) -> Result<T, ProviderError> {
        let token = bearer(self.shared.credentials.as_ref()).await?;

        debug!("{} {}", method, url.path());
        let mut request = self.shared.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status, &text));
        }

        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| {
            ProviderError::new(
                ProviderErrorKind::Unexpected,
                format!("Invalid provider response: {}", e),
            )
        })
    }

    async fn verify(&self, id_token: &str) -> Result<VerifiedToken, ProviderError> {
        let invalid = |msg: String| ProviderError::new(ProviderErrorKind::InvalidIdToken, msg);

        if id_token.is_empty() {
            return Err(invalid("ID token must be a non-empty string".to_string()));
        }

        let header = decode_header(id_token).map_err(|e| invalid(format!("Invalid ID token header: {}", e)))?;
        if header.alg != Algorithm::RS256 {
            return Err(invalid(format!(
                "ID token has invalid algorithm; expected RS256 but got {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| invalid("ID token has no 'kid' header".to_string()))?;

        let key = self
            .shared
            .signing_keys
            .get_key(&kid)
            .await
            .map_err(|e| ProviderError::new(ProviderErrorKind::SigningKeys, e.to_string()))?;

        let project = self.shared.project_id.as_str();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[format!("{}{}", TOKEN_ISSUER_PREFIX, project)]);
        validation.set_audience(&[project]);
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);
        // Checked below so the error can carry the `exp` value.
        validation.validate_exp = false;

        let data = decode::<Map<String, Value>>(id_token, &key, &validation)
            .map_err(|e| invalid(format!("Failed to verify ID token: {}", e)))?;

        if let Some(exp) = data.claims.get("exp").and_then(Value::as_i64) {
            let leeway = i64::try_from(validation.leeway).unwrap_or(i64::MAX);
            if exp.saturating_add(leeway) < Utc::now().timestamp() {
                return Err(ProviderError::new(
                    ProviderErrorKind::IdTokenExpired,
                    format!("{} at {}", ID_TOKEN_EXPIRED_MESSAGE, exp),
                ));
            }
        }

        let token = claims_to_token(data.claims)?;

        if let Some(bound) = &self.tenant_id {
            if &token.tenant_id != bound {
                return Err(ProviderError::new(
                    ProviderErrorKind::TenantIdMismatch,
                    format!(
                        "Invalid tenant id: expected '{}' but token has '{}'",
                        bound, token.tenant_id
                    ),
                ));
            }
        }

        Ok(token)
    }

    async fn lookup(&self, uid: &UserId) -> Result<UserRecord, ProviderError> {
        #[derive(Deserialize)]
        struct LookupResponse {
            #[serde(default)]
            users: Vec<WireUser>,
        }

        let url = self.accounts_url("accounts:lookup")?;
        let response: LookupResponse = self
            .call(Method::POST, url, Some(json!({ "localId": [uid.as_str()] })))
            .await?;

        response
            .users
            .into_iter()
            .next()
            .map(WireUser::into_record)
            .ok_or_else(|| {
                ProviderError::new(
                    ProviderErrorKind::UserNotFound,
                    format!("No user record found for uid: {}", uid),
                )
            })
    }

    async fn create(&self, user: &UserToCreate) -> Result<UserRecord, ProviderError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct CreateResponse {
            local_id: String,
        }

        let mut body = Map::new();
        insert_opt(&mut body, "localId", user.uid.as_ref().map(UserId::as_str));
        insert_opt(&mut body, "email", user.email.as_deref());
        insert_opt(&mut body, "emailVerified", user.email_verified);
        insert_opt(&mut body, "password", user.password.as_deref());
        insert_opt(&mut body, "displayName", user.display_name.as_deref());
        insert_opt(&mut body, "phoneNumber", user.phone_number.as_deref());
        insert_opt(&mut body, "photoUrl", user.photo_url.as_deref());
        insert_opt(&mut body, "disabled", user.disabled);

        let url = self.accounts_url("accounts")?;
        let created: CreateResponse = self.call(Method::POST, url, Some(Value::Object(body))).await?;

        self.lookup(&UserId::new(created.local_id)).await
    }

    async fn update(&self, uid: &UserId, update: &UserToUpdate) -> Result<UserRecord, ProviderError> {
        let mut body = Map::new();
        body.insert("localId".to_string(), Value::from(uid.as_str()));
        insert_opt(&mut body, "email", update.email.as_deref());
        insert_opt(&mut body, "emailVerified", update.email_verified);
        insert_opt(&mut body, "password", update.password.as_deref());
        insert_opt(&mut body, "displayName", update.display_name.as_deref());
        insert_opt(&mut body, "phoneNumber", update.phone_number.as_deref());
        insert_opt(&mut body, "photoUrl", update.photo_url.as_deref());
        insert_opt(&mut body, "disableUser", update.disabled);

        let url = self.accounts_url("accounts:update")?;
        let _: Value = self.call(Method::POST, url, Some(Value::Object(body))).await?;

        self.lookup(uid).await
    }

    async fn delete(&self, uid: &UserId) -> Result<(), ProviderError> {
        let url = self.accounts_url("accounts:delete")?;
        let _: Value = self
            .call(Method::POST, url, Some(json!({ "localId": uid.as_str() })))
            .await?;
        Ok(())
    }
}

impl IdentityClient for IdentityToolkitClient {
    fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    fn verify_id_token<'a>(&'a self, id_token: &'a str) -> ProviderFuture<'a, VerifiedToken> {
        Box::pin(self.verify(id_token))
    }

    fn create_user<'a>(&'a self, user: &'a UserToCreate) -> ProviderFuture<'a, UserRecord> {
        Box::pin(self.create(user))
    }

    fn update_user<'a>(&'a self, uid: &'a UserId, update: &'a UserToUpdate) -> ProviderFuture<'a, UserRecord> {
        Box::pin(self.update(uid, update))
    }

    fn delete_user<'a>(&'a self, uid: &'a UserId) -> ProviderFuture<'a, ()> {
        Box::pin(self.delete(uid))
    }
}

/// Tenant administration over the v2 tenants resource.
#[derive(Clone)]
pub struct ToolkitTenantManager {
    client: IdentityToolkitClient,
}

impl ToolkitTenantManager {
    async fn create(&self, tenant: &TenantToCreate) -> Result<Tenant, ProviderError> {
        let mut body = Map::new();
        insert_opt(&mut body, "displayName", tenant.display_name.as_deref());
        insert_opt(&mut body, "allowPasswordSignup", tenant.allow_password_sign_up);
        insert_opt(&mut body, "enableEmailLinkSignin", tenant.enable_email_link_sign_in);
        insert_opt(&mut body, "enableAnonymousUser", tenant.enable_anonymous_users);

        let url = self.client.tenants_url(None)?;
        let wire: WireTenant = self.client.call(Method::POST, url, Some(Value::Object(body))).await?;
        Ok(wire.into_tenant())
    }

    async fn update(&self, tenant_id: &TenantId, update: &TenantToUpdate) -> Result<Tenant, ProviderError> {
        if update.is_empty() {
            return Err(ProviderError::new(
                ProviderErrorKind::InvalidArgument,
                "Tenant update must specify at least one property",
            ));
        }

        let mut body = Map::new();
        let mut mask = Vec::new();
        for (field, value) in [
            ("displayName", update.display_name.clone().map(Value::from)),
            ("allowPasswordSignup", update.allow_password_sign_up.map(Value::from)),
            ("enableEmailLinkSignin", update.enable_email_link_sign_in.map(Value::from)),
            ("enableAnonymousUser", update.enable_anonymous_users.map(Value::from)),
        ] {
            if let Some(value) = value {
                body.insert(field.to_string(), value);
                mask.push(field);
            }
        }

        let mut url = self.client.tenants_url(Some(tenant_id))?;
        url.query_pairs_mut().append_pair("updateMask", &mask.join(","));

        let wire: WireTenant = self.client.call(Method::PATCH, url, Some(Value::Object(body))).await?;
        Ok(wire.into_tenant())
    }

    async fn delete(&self, tenant_id: &TenantId) -> Result<(), ProviderError> {
        let url = self.client.tenants_url(Some(tenant_id))?;
        let _: Value = self.client.call(Method::DELETE, url, None).await?;
        Ok(())
    }
}

impl TenantManager for ToolkitTenantManager {
    fn auth_for_tenant(&self, tenant_id: &TenantId) -> Result<Arc<dyn IdentityClient>, ProviderError> {
        validate_tenant_id(tenant_id)?;
        Ok(Arc::new(self.client.for_tenant(tenant_id.clone())))
    }

    fn create_tenant<'a>(&'a self, tenant: &'a TenantToCreate) -> ProviderFuture<'a, Tenant> {
        Box::pin(self.create(tenant))
    }

    fn update_tenant<'a>(&'a self, tenant_id: &'a TenantId, update: &'a TenantToUpdate) -> ProviderFuture<'a, Tenant> {
        Box::pin(self.update(tenant_id, update))
    }

    fn delete_tenant<'a>(&'a self, tenant_id: &'a TenantId) -> ProviderFuture<'a, ()> {
        Box::pin(self.delete(tenant_id))
    }
}

/// Tenant ids are provider-generated: ASCII letters, digits and `-`.
fn validate_tenant_id(tenant_id: &TenantId) -> Result<(), ProviderError> {
    let ok = !tenant_id.is_empty()
        && tenant_id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if ok {
        Ok(())
    } else {
        Err(ProviderError::new(
            ProviderErrorKind::InvalidTenantId,
            format!("Invalid tenant id: '{}'", tenant_id),
        ))
    }
}

fn claims_to_token(claims: Map<String, Value>) -> Result<VerifiedToken, ProviderError> {
    let invalid = |msg: &str| ProviderError::new(ProviderErrorKind::InvalidIdToken, msg.to_string());
    let int_claim = |name: &str| claims.get(name).and_then(Value::as_i64);

    let uid = claims
        .get("sub")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if uid.is_empty() {
        return Err(invalid("ID token has an empty 'sub' claim"));
    }
    if uid.len() > MAX_UID_LENGTH {
        return Err(invalid("ID token has a 'sub' claim longer than 128 characters"));
    }
    let uid = UserId::new(uid);

    let issued_at = int_claim("iat").ok_or_else(|| invalid("ID token has no 'iat' claim"))?;
    let expires_at = int_claim("exp").ok_or_else(|| invalid("ID token has no 'exp' claim"))?;
    let auth_time = int_claim("auth_time").ok_or_else(|| invalid("ID token has no 'auth_time' claim"))?;
    let tenant_id = claims
        .get("firebase")
        .and_then(|f| f.get("tenant"))
        .and_then(Value::as_str)
        .map(TenantId::from)
        .unwrap_or_default();

    Ok(VerifiedToken {
        uid,
        auth_time,
        issued_at,
        expires_at,
        tenant_id,
        claims,
    })
}

fn insert_opt<T: Into<Value>>(body: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        body.insert(key.to_string(), value.into());
    }
}

/// Map an error response (`{"error": {"message": "CODE : detail"}}`) to a kind.
fn api_error(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string());

    let code = message
        .split(|c: char| c == ' ' || c == ':')
        .next()
        .unwrap_or_default();

    let kind = match code {
        "USER_NOT_FOUND" => ProviderErrorKind::UserNotFound,
        "TENANT_NOT_FOUND" => ProviderErrorKind::TenantNotFound,
        "EMAIL_EXISTS" => ProviderErrorKind::EmailAlreadyExists,
        "DUPLICATE_LOCAL_ID" => ProviderErrorKind::UidAlreadyExists,
        "INVALID_TENANT_ID" => ProviderErrorKind::InvalidTenantId,
        c if c.starts_with("INVALID_") || c.starts_with("MISSING_") => ProviderErrorKind::InvalidArgument,
        _ if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN => {
            ProviderErrorKind::Unauthorized
        }
        _ if status == reqwest::StatusCode::NOT_FOUND => ProviderErrorKind::TenantNotFound,
        _ => ProviderErrorKind::Unexpected,
    };

    ProviderError::new(kind, format!("[{}] {}", status, message))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    local_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
    #[serde(default)]
    photo_url: Option<String>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    tenant_id: Option<String>,
}

impl WireUser {
    fn into_record(self) -> UserRecord {
        UserRecord {
            uid: UserId::new(self.local_id),
            email: self.email,
            email_verified: self.email_verified,
            display_name: self.display_name,
            phone_number: self.phone_number,
            photo_url: self.photo_url,
            disabled: self.disabled,
            tenant_id: self.tenant_id.map(TenantId::from).unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTenant {
    /// `projects/{project}/tenants/{tenant}`
    name: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    allow_password_signup: bool,
    #[serde(default)]
    enable_email_link_signin: bool,
    #[serde(default)]
    enable_anonymous_user: bool,
}

impl WireTenant {
    fn into_tenant(self) -> Tenant {
        let id = self.name.rsplit('/').next().unwrap_or_default();
        Tenant {
            id: TenantId::from(id),
            display_name: self.display_name,
            allow_password_sign_up: self.allow_password_signup,
            enable_email_link_sign_in: self.enable_email_link_signin,
            enable_anonymous_users: self.enable_anonymous_user,
        }
    }
}
