use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;
use tenant_auth::{
    AccessTokenSource, AppState, ClientOptions, DEFAULT_HTTP_TIMEOUT_SECONDS, ProviderClients,
    StaticTokenSource, TenancyConfig, TenantAdmin, TenantInheritanceConfig, TenantToCreate,
    TenantToUpdate, UserId, UserManager, UserToCreate, application_default, parse_tenant_list,
};

#[derive(Parser)]
#[command(name = "tenant-auth")]
#[command(about = "Multi-tenant identity provider auth middleware and admin API")]
struct Cli {
    #[command(flatten)]
    provider: ProviderArgs,
    #[command(subcommand)]
    command: Commands,
}

/// Provider connection settings and overrides on top of the environment.
#[derive(Args)]
struct ProviderArgs {
    /// Identity Toolkit API base URL
    #[arg(long, global = true, default_value = tenant_auth::DEFAULT_API_BASE)]
    api_base: Url,
    /// JWKS endpoint with the ID token signing keys
    #[arg(long, global = true, default_value = tenant_auth::DEFAULT_SIGNING_KEYS_URL)]
    signing_keys_url: String,
    /// Timeout for outbound provider calls, in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_HTTP_TIMEOUT_SECONDS)]
    timeout_seconds: u64,
    /// Use this OAuth access token instead of application-default credentials
    #[arg(long, global = true, env = "TENANT_AUTH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
    /// Override the project id
    #[arg(long, global = true, env = "GOOGLE_CLOUD_PROJECT")]
    project_id: Option<String>,
    /// Override tenant enforcement (only "true" enables it)
    #[arg(long, global = true, env = "FIREBASE_ENFORCE_TENANT", value_parser = parse_enforce_flag)]
    enforce_tenant: Option<bool>,
    /// Override the pinned tenant id
    #[arg(long, global = true, env = "FIREBASE_TENANT_ID")]
    tenant_id: Option<String>,
    /// Override the comma-separated tenant denylist
    #[arg(long, global = true, env = "FIREBASE_BLACKLIST_TENANT_IDS")]
    blocked_tenant_ids: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the public API and the admin API
    Server {
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Bind address for the admin API (internal / trusted only)
        #[arg(long, default_value = "127.0.0.1:8081")]
        admin_bind: String,
    },
    /// Create a user
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
        /// Tenant to create the user in (defaults to the pinned tenant)
        #[arg(long, default_value = "")]
        tenant: String,
    },
    /// Delete a user
    DeleteUser {
        uid: String,
        #[arg(long, default_value = "")]
        tenant: String,
    },
    /// Create a tenant
    CreateTenant {
        #[arg(long)]
        display_name: String,
        #[arg(long)]
        allow_password_sign_up: Option<bool>,
        #[arg(long)]
        enable_email_link_sign_in: Option<bool>,
    },
    /// Update a tenant's settings
    UpdateTenant {
        tenant: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        allow_password_sign_up: Option<bool>,
        #[arg(long)]
        enable_email_link_sign_in: Option<bool>,
        #[arg(long)]
        enable_anonymous_users: Option<bool>,
    },
    /// Delete a tenant
    DeleteTenant { tenant: String },
    /// Set whether a tenant inherits the project's email sending settings
    UpdateInheritance {
        tenant: String,
        #[arg(long, action = clap::ArgAction::Set)]
        email_sending_enabled: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tenant_auth=info".parse()?)
                .add_directive("hyper=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let (config, clients) = connect(&cli.provider)?;

    match cli.command {
        Commands::Server { port, admin_bind } => {
            info!("Starting public API on port {}", port);
            info!("Starting admin API on {}", admin_bind);

            let state = AppState::new(config, clients);
            let public_app = tenant_auth::api::create_public_router(state.clone());
            let admin_app = tenant_auth::api::create_admin_router(state);

            let public_listener =
                tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
            let admin_listener = tokio::net::TcpListener::bind(&admin_bind).await?;

            info!("Public server listening on http://0.0.0.0:{}", port);
            info!("Admin server listening on http://{}", admin_bind);

            tokio::try_join!(
                axum::serve(public_listener, public_app),
                axum::serve(admin_listener, admin_app),
            )?;
        }
        Commands::CreateUser {
            email,
            password,
            display_name,
            tenant,
        } => {
            let mut user = UserToCreate::new().email(email);
            user.password = password;
            user.display_name = display_name;

            let record = UserManager::new(config, clients)
                .create_user(&user, &tenant)
                .await?;
            println!("Created user {}", record.uid);
            if !record.tenant_id.is_empty() {
                println!("  Tenant: {}", record.tenant_id);
            }
        }
        Commands::DeleteUser { uid, tenant } => {
            UserManager::new(config, clients)
                .delete_user(&UserId::new(uid.clone()), &tenant)
                .await?;
            println!("Deleted user {}", uid);
        }
        Commands::CreateTenant {
            display_name,
            allow_password_sign_up,
            enable_email_link_sign_in,
        } => {
            let tenant = TenantToCreate {
                display_name: Some(display_name),
                allow_password_sign_up,
                enable_email_link_sign_in,
                ..Default::default()
            };
            let created = TenantAdmin::new(config, clients).create_tenant(&tenant).await?;
            println!("Created tenant {} ({})", created.id, created.display_name);
        }
        Commands::UpdateTenant {
            tenant,
            display_name,
            allow_password_sign_up,
            enable_email_link_sign_in,
            enable_anonymous_users,
        } => {
            let update = TenantToUpdate {
                display_name,
                allow_password_sign_up,
                enable_email_link_sign_in,
                enable_anonymous_users,
            };
            if update.is_empty() {
                bail!("Nothing to update for tenant {}", tenant);
            }
            let updated = TenantAdmin::new(config, clients)
                .update_tenant(&tenant, &update)
                .await?;
            println!("Updated tenant {}", updated.id);
        }
        Commands::DeleteTenant { tenant } => {
            TenantAdmin::new(config, clients).delete_tenant(&tenant).await?;
            println!("Deleted tenant {}", tenant);
        }
        Commands::UpdateInheritance {
            tenant,
            email_sending_enabled,
        } => {
            TenantAdmin::new(config, clients)
                .update_tenant_inheritance(
                    &tenant,
                    TenantInheritanceConfig {
                        email_sending_enabled,
                    },
                )
                .await?;
            println!(
                "Tenant {} email sending inheritance set to {}",
                tenant, email_sending_enabled
            );
        }
    }

    Ok(())
}

fn parse_enforce_flag(value: &str) -> Result<bool, std::convert::Infallible> {
    Ok(value == "true")
}

/// Load configuration and build the provider clients.
///
/// Failing here aborts startup.
fn connect(args: &ProviderArgs) -> Result<(Arc<TenancyConfig>, Arc<ProviderClients>)> {
    let mut config = TenancyConfig::from_env().context("Failed to load configuration")?;
    if let Some(project_id) = &args.project_id {
        config = config.with_project_id(project_id.as_str());
    }
    if let Some(enforce) = args.enforce_tenant {
        config = config.with_enforce_tenant(enforce);
    }
    if let Some(tenant_id) = &args.tenant_id {
        config = config.with_tenant_id(tenant_id.as_str());
    }
    if let Some(raw) = &args.blocked_tenant_ids {
        config = config.with_blocked_tenants(parse_tenant_list(raw));
    }

    let timeout = Duration::from_secs(args.timeout_seconds);
    let credentials: Arc<dyn AccessTokenSource> = match &args.access_token {
        Some(token) => {
            info!("Using access token from the command line");
            Arc::new(StaticTokenSource::new(token.as_str()))
        }
        None => {
            let http = reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .context("Failed to create HTTP client")?;
            application_default(http).context("Failed to load application default credentials")?
        }
    };

    if config.project_id().is_empty() {
        if let Some(project_id) = credentials.project_id() {
            info!("Using project id {} from credentials", project_id);
            config = config.with_project_id(project_id);
        }
    }

    info!(
        enforce_tenant = config.enforce_tenant(),
        blocked_tenants = config.blocked_tenant_ids().len(),
        "Tenancy configuration loaded"
    );

    let options = ClientOptions {
        api_base: args.api_base.clone(),
        signing_keys_url: args.signing_keys_url.clone(),
        timeout,
    };
    let clients = ProviderClients::initialize(&config, credentials, options)?;

    Ok((Arc::new(config), Arc::new(clients)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::ffi::OsStr;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_tenancy_args_fall_back_to_env() {
        let cmd = Cli::command();
        for (id, var) in [
            ("project_id", "GOOGLE_CLOUD_PROJECT"),
            ("enforce_tenant", "FIREBASE_ENFORCE_TENANT"),
            ("tenant_id", "FIREBASE_TENANT_ID"),
            ("blocked_tenant_ids", "FIREBASE_BLACKLIST_TENANT_IDS"),
        ] {
            let arg = cmd.get_arguments().find(|a| a.get_id() == id).unwrap();
            assert_eq!(arg.get_env(), Some(OsStr::new(var)), "{}", id);
        }
    }

    #[test]
    fn test_enforce_flag_requires_exact_true() {
        let cli = Cli::try_parse_from(["tenant-auth", "--enforce-tenant", "true", "delete-tenant", "t-1"])
            .unwrap();
        assert_eq!(cli.provider.enforce_tenant, Some(true));

        for value in ["TRUE", "1", "yes"] {
            let cli = Cli::try_parse_from(["tenant-auth", "--enforce-tenant", value, "delete-tenant", "t-1"])
                .unwrap();
            assert_eq!(cli.provider.enforce_tenant, Some(false), "{}", value);
        }
    }
}
