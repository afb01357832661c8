use async_trait::async_trait;
use sqlx::{Executor, PgPool};
use uuid::Uuid;

use crate::database::{Branch, DatabaseManager, Tenant};
use crate::provisioning::naming;
use crate::provisioning::schema::BranchSchema;
use crate::store::{PlatformStore, StoreError, StoreResult};

pub struct PgPlatformStore {
    pool: PgPool,
}

impl PgPlatformStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BRANCH_COLUMNS: &str =
    "id, tenant_domain, group_id, name, description, schema_name, created_at, updated_at";

const TENANT_COLUMNS: &str = "domain, name, description, realm_id, created_at, updated_at";

#[async_trait]
impl PlatformStore for PgPlatformStore {
    async fn provision_branch_schema(&self, schema: &BranchSchema, branch: &Branch) -> StoreResult<()> {
        if !naming::is_valid_schema_name(&schema.name) {
            return Err(StoreError::InvalidIdentifier(schema.name.clone()));
        }

        let mut tx = self.pool.begin().await?;
        (&mut *tx).execute(schema.script.as_str()).await?;

        let insert = format!(
            "INSERT INTO {}.branch_info (id, tenant_domain, name, description) VALUES ($1, $2, $3, $4)",
            schema.quoted_name()
        );
        sqlx::query(&insert)
            .bind(branch.id)
            .bind(&branch.tenant_domain)
            .bind(&branch.name)
            .bind(&branch.description)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        tracing::info!("Provisioned schema {} for branch {}", schema.name, branch.name);
        Ok(())
    }

    async fn drop_branch_schema(&self, schema_name: &str) -> StoreResult<()> {
        if !naming::is_valid_schema_name(schema_name) {
            return Err(StoreError::InvalidIdentifier(schema_name.to_string()));
        }
        let query = format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            DatabaseManager::quote_identifier(schema_name)
        );
        sqlx::query(&query).execute(&self.pool).await?;
        tracing::info!("Dropped schema {}", schema_name);
        Ok(())
    }

    async fn insert_branch(&self, branch: &Branch) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO branches ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            BRANCH_COLUMNS
        ))
        .bind(branch.id)
        .bind(&branch.tenant_domain)
        .bind(&branch.group_id)
        .bind(&branch.name)
        .bind(&branch.description)
        .bind(&branch.schema_name)
        .bind(branch.created_at)
        .bind(branch.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_branch(&self, branch: &Branch) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE branches SET name = $2, description = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(branch.id)
        .bind(&branch.name)
        .bind(&branch.description)
        .bind(branch.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("branch {}", branch.id)));
        }
        Ok(())
    }

    async fn delete_branch(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM branches WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_branch(&self, tenant: &str, id: Uuid) -> StoreResult<Option<Branch>> {
        let branch = sqlx::query_as::<_, Branch>(&format!(
            "SELECT {} FROM branches WHERE tenant_domain = $1 AND id = $2",
            BRANCH_COLUMNS
        ))
        .bind(tenant)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(branch)
    }

    async fn list_branches(&self, tenant: &str) -> StoreResult<Vec<Branch>> {
        let branches = sqlx::query_as::<_, Branch>(&format!(
            "SELECT {} FROM branches WHERE tenant_domain = $1 ORDER BY created_at, name",
            BRANCH_COLUMNS
        ))
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?;
        Ok(branches)
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        sqlx::query(&format!(
            "INSERT INTO tenants ({}) VALUES ($1, $2, $3, $4, $5, $6)",
            TENANT_COLUMNS
        ))
        .bind(&tenant.domain)
        .bind(&tenant.name)
        .bind(&tenant.description)
        .bind(&tenant.realm_id)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE tenants SET name = $2, description = $3, updated_at = $4 WHERE domain = $1",
        )
        .bind(&tenant.domain)
        .bind(&tenant.name)
        .bind(&tenant.description)
        .bind(tenant.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("tenant {}", tenant.domain)));
        }
        Ok(())
    }

    async fn get_tenant(&self, domain: &str) -> StoreResult<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {} FROM tenants WHERE domain = $1",
            TENANT_COLUMNS
        ))
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }
}
