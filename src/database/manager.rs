use sqlx::{postgres::PgPoolOptions, Executor, PgPool};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::store::StoreError;

/// Platform-wide tables. Branch-local tables live in per-branch schemas.
const PLATFORM_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    "domain" TEXT PRIMARY KEY,
    "name" TEXT NOT NULL,
    "description" TEXT NOT NULL DEFAULT '',
    "realm_id" TEXT NOT NULL,
    "created_at" TIMESTAMPTZ DEFAULT now() NOT NULL,
    "updated_at" TIMESTAMPTZ DEFAULT now() NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    "id" UUID PRIMARY KEY,
    "tenant_domain" TEXT NOT NULL,
    "group_id" TEXT NOT NULL,
    "name" TEXT NOT NULL,
    "description" TEXT NOT NULL DEFAULT '',
    "schema_name" TEXT NOT NULL UNIQUE,
    "created_at" TIMESTAMPTZ DEFAULT now() NOT NULL,
    "updated_at" TIMESTAMPTZ DEFAULT now() NOT NULL,
    UNIQUE ("tenant_domain", "name")
);

CREATE INDEX IF NOT EXISTS branches_tenant_domain_idx ON branches ("tenant_domain");
"#;

/// Connection setup and shared SQL helpers for the platform database
pub struct DatabaseManager;

impl DatabaseManager {
    /// Open the platform pool described by `config`
    pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not set".to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;

        info!("Connected platform database pool (max {} connections)", config.max_connections);
        Ok(pool)
    }

    /// Create the platform tables if they are missing
    pub async fn bootstrap(pool: &PgPool) -> Result<(), StoreError> {
        // Unprepared: the script holds several statements
        pool.execute(PLATFORM_TABLES).await?;
        info!("Platform tables ready");
        Ok(())
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check(pool: &PgPool) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    /// Quote SQL identifier to prevent injection
    pub fn quote_identifier(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}
