use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tenant_provisioner::config::config;
use tenant_provisioner::database::DatabaseManager;
use tenant_provisioner::handlers::{app, AppState};
use tenant_provisioner::iap::HttpIdentityProvider;
use tenant_provisioner::is_development;
use tenant_provisioner::provisioning::TenantProvisioner;
use tenant_provisioner::store::PgPlatformStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, IAP_* etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Initialize configuration (this loads the config singleton)
    let config = config();
    info!("Starting tenant provisioner in {:?} mode", config.environment);
    if is_development!() {
        tracing::debug!("Configuration: {:?}", config);
    }

    let provisioning = config
        .load_provisioning()
        .context("failed to load provisioning config")?;

    let pool = DatabaseManager::connect(&config.database)
        .await
        .context("failed to connect to the platform database")?;
    DatabaseManager::bootstrap(&pool)
        .await
        .context("failed to create platform tables")?;

    let iap = HttpIdentityProvider::from_config(&config.iap).context("invalid identity provider config")?;

    let tenants = TenantProvisioner::new(
        Arc::new(iap),
        Arc::new(PgPlatformStore::new(pool.clone())),
        Arc::new(provisioning),
    );
    let app = app(AppState::new(tenants, Some(pool)), config.api.enable_request_logging);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!("Tenant provisioner listening on http://{}", bind_addr);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
