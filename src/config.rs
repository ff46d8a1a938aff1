use std::collections::{BTreeMap, HashSet};
use std::{env, fmt, io, path::Path, path::PathBuf};

use crate::types::{ProjectId, TenantId};

/// Selects the `.env.<ENV>` overlay file; `default` (or unset) means none.
pub const ENV_PROFILE: &str = "ENV";
pub const ENV_PROJECT_ID: &str = "GOOGLE_CLOUD_PROJECT";
pub const ENV_ENFORCE_TENANT: &str = "FIREBASE_ENFORCE_TENANT";
pub const ENV_TENANT_ID: &str = "FIREBASE_TENANT_ID";
pub const ENV_BLOCKED_TENANT_IDS: &str = "FIREBASE_BLACKLIST_TENANT_IDS";

/// Process-wide tenancy settings.
///
/// Built once at startup and shared behind an `Arc`; nothing mutates it
/// afterwards, so concurrent reads need no synchronization.
#[derive(Debug, Clone, Default)]
pub struct TenancyConfig {
    project_id: ProjectId,
    tenant_id: Option<TenantId>,
    enforce_tenant: bool,
    blocked_tenant_ids: HashSet<TenantId>,
}

impl TenancyConfig {
    pub fn new(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_enforce_tenant(mut self, enforce: bool) -> Self {
        self.enforce_tenant = enforce;
        self
    }

    /// Set the tenant every request is pinned to. Empty ids are ignored.
    pub fn with_tenant_id(mut self, tenant_id: impl Into<TenantId>) -> Self {
        let tenant_id = tenant_id.into();
        self.tenant_id = (!tenant_id.is_empty()).then_some(tenant_id);
        self
    }

    pub fn with_blocked_tenants<I, T>(mut self, tenants: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TenantId>,
    {
        self.blocked_tenant_ids = tenants
            .into_iter()
            .map(Into::into)
            .filter(|t: &TenantId| !t.is_empty())
            .collect();
        self
    }

    /// Replace the project id (used when it is only known from credentials).
    pub fn with_project_id(mut self, project_id: impl Into<ProjectId>) -> Self {
        self.project_id = project_id.into();
        self
    }

    /// Load from the process environment, overlaid with `.env.<ENV>` when
    /// `ENV` names a profile. Variables already set in the process win over
    /// the file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let overlay = match resolve_env_file_path() {
            Some(path) => load_env_file(&path)?,
            None => BTreeMap::new(),
        };

        Ok(Self::from_lookup(|key| {
            env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| overlay.get(key).cloned())
        }))
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        Self::new(get(ENV_PROJECT_ID).unwrap_or_default())
            .with_enforce_tenant(get(ENV_ENFORCE_TENANT).as_deref() == Some("true"))
            .with_tenant_id(get(ENV_TENANT_ID).unwrap_or_default())
            .with_blocked_tenants(parse_tenant_list(
                &get(ENV_BLOCKED_TENANT_IDS).unwrap_or_default(),
            ))
    }

    /// Reject configurations the provider client cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.is_empty() {
            return Err(ConfigError::MissingProjectId);
        }
        Ok(())
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// The configured tenant id, whether or not it ends up pinned.
    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    pub fn enforce_tenant(&self) -> bool {
        self.enforce_tenant
    }

    /// Tenant that gets a pre-bound client at startup.
    ///
    /// Only set when enforcement is on and a tenant id was configured.
    pub fn pinned_tenant(&self) -> Option<&TenantId> {
        if self.enforce_tenant {
            self.tenant_id.as_ref()
        } else {
            None
        }
    }

    pub fn is_blocked(&self, tenant_id: &str) -> bool {
        self.blocked_tenant_ids.contains(tenant_id)
    }

    pub fn blocked_tenant_ids(&self) -> &HashSet<TenantId> {
        &self.blocked_tenant_ids
    }
}

/// Split a comma separated tenant list, trimming entries and dropping empties.
pub fn parse_tenant_list(raw: &str) -> Vec<TenantId> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(TenantId::from)
        .collect()
}

/// `.env.<ENV>` in the working directory, unless `ENV` is unset or `default`.
pub fn resolve_env_file_path() -> Option<PathBuf> {
    match env::var(ENV_PROFILE) {
        Ok(profile) if !profile.is_empty() && profile != "default" => {
            Some(PathBuf::from(format!(".env.{}", profile)))
        }
        _ => None,
    }
}

/// Read `KEY=VALUE` pairs from an env file without touching the process
/// environment.
///
/// A missing file yields an empty map.
pub fn load_env_file(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let env_error = |e: dotenvy::Error| ConfigError::EnvFile(path.to_path_buf(), e.to_string());

    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(dotenvy::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("No env file at {}, using process environment", path.display());
            return Ok(BTreeMap::new());
        }
        Err(e) => return Err(env_error(e)),
    };

    iter.map(|item| item.map_err(env_error)).collect()
}

/// Configuration errors.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// No project id from the environment or the credentials.
    MissingProjectId,
    /// The env file exists but could not be read.
    EnvFile(PathBuf, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingProjectId => write!(
                f,
                "Missing project id (set {} or use service account credentials)",
                ENV_PROJECT_ID
            ),
            Self::EnvFile(path, msg) => {
                write!(f, "Failed to read env file {}: {}", path.display(), msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
