use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::database::{Branch, Tenant};
use crate::provisioning::schema::BranchSchema;

pub mod memory;
pub mod postgres;

pub use memory::MemoryPlatformStore;
pub use postgres::PgPlatformStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

// Postgres error codes that mean "this already exists".
const UNIQUE_VIOLATION: &str = "23505";
const DUPLICATE_SCHEMA: &str = "42P06";
const DUPLICATE_TABLE: &str = "42P07";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db)
                if matches!(
                    db.code().as_deref(),
                    Some(UNIQUE_VIOLATION) | Some(DUPLICATE_SCHEMA) | Some(DUPLICATE_TABLE)
                ) =>
            {
                StoreError::Conflict(db.message().to_string())
            }
            other => StoreError::Sqlx(other),
        }
    }
}

/// Relational side of provisioning: branch schemas plus the platform-wide
/// tenant and branch metadata tables.
#[async_trait]
pub trait PlatformStore: Send + Sync {
    /// Run the branch schema script and write the branch's own `branch_info` row.
    async fn provision_branch_schema(&self, schema: &BranchSchema, branch: &Branch) -> StoreResult<()>;
    async fn drop_branch_schema(&self, schema_name: &str) -> StoreResult<()>;

    async fn insert_branch(&self, branch: &Branch) -> StoreResult<()>;
    async fn update_branch(&self, branch: &Branch) -> StoreResult<()>;
    async fn delete_branch(&self, id: Uuid) -> StoreResult<()>;
    async fn get_branch(&self, tenant: &str, id: Uuid) -> StoreResult<Option<Branch>>;
    async fn list_branches(&self, tenant: &str) -> StoreResult<Vec<Branch>>;

    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()>;
    async fn update_tenant(&self, tenant: &Tenant) -> StoreResult<()>;
    async fn get_tenant(&self, domain: &str) -> StoreResult<Option<Tenant>>;
}
