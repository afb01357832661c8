//! In-memory platform store for tests and local development.
//!
//! Schemas are tracked by name only; the script is kept so tests can inspect
//! what would have run. Unique constraints mirror the Postgres tables.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::database::{Branch, Tenant};
use crate::provisioning::schema::BranchSchema;
use crate::store::{PlatformStore, StoreError, StoreResult};

#[derive(Default)]
struct State {
    schemas: BTreeMap<String, String>,
    branches: BTreeMap<Uuid, Branch>,
    tenants: BTreeMap<String, Tenant>,
    calls: Vec<String>,
    failures: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryPlatformStore {
    state: Mutex<State>,
}

impl MemoryPlatformStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future call of `operation` (e.g. `"insert_branch"`) fail.
    pub fn fail_on(&self, operation: &str) {
        self.lock().failures.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn schema_exists(&self, name: &str) -> bool {
        self.lock().schemas.contains_key(name)
    }

    pub fn schema_script(&self, name: &str) -> Option<String> {
        self.lock().schemas.get(name).cloned()
    }

    /// Create a bare schema without a branch row, e.g. to provoke a collision.
    pub fn seed_schema(&self, name: &str) {
        self.lock().schemas.insert(name.to_string(), String::new());
    }

    pub fn branches(&self) -> Vec<Branch> {
        self.lock().branches.values().cloned().collect()
    }

    pub fn tenant(&self, domain: &str) -> Option<Tenant> {
        self.lock().tenants.get(domain).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, operation: &str) -> StoreResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(operation.to_string());
        if state.failures.contains(operation) {
            return Err(StoreError::Unavailable(format!("injected failure in {}", operation)));
        }
        Ok(state)
    }
}

#[async_trait]
impl PlatformStore for MemoryPlatformStore {
    async fn provision_branch_schema(&self, schema: &BranchSchema, _branch: &Branch) -> StoreResult<()> {
        let mut state = self.enter("provision_branch_schema")?;
        if state.schemas.contains_key(&schema.name) {
            return Err(StoreError::Conflict(format!(
                "schema \"{}\" already exists",
                schema.name
            )));
        }
        state.schemas.insert(schema.name.clone(), schema.script.clone());
        Ok(())
    }

    async fn drop_branch_schema(&self, schema_name: &str) -> StoreResult<()> {
        let mut state = self.enter("drop_branch_schema")?;
        state.schemas.remove(schema_name);
        Ok(())
    }

    async fn insert_branch(&self, branch: &Branch) -> StoreResult<()> {
        let mut state = self.enter("insert_branch")?;
        let duplicate = state.branches.values().any(|existing| {
            existing.id == branch.id
                || existing.schema_name == branch.schema_name
                || (existing.tenant_domain == branch.tenant_domain && existing.name == branch.name)
        });
        if duplicate {
            return Err(StoreError::Conflict(format!("branch {}", branch.name)));
        }
        state.branches.insert(branch.id, branch.clone());
        Ok(())
    }

    async fn update_branch(&self, branch: &Branch) -> StoreResult<()> {
        let mut state = self.enter("update_branch")?;
        let renamed_onto_sibling = state.branches.values().any(|existing| {
            existing.id != branch.id
                && existing.tenant_domain == branch.tenant_domain
                && existing.name == branch.name
        });
        if renamed_onto_sibling {
            return Err(StoreError::Conflict(format!("branch {}", branch.name)));
        }
        match state.branches.get_mut(&branch.id) {
            Some(existing) => {
                existing.name = branch.name.clone();
                existing.description = branch.description.clone();
                existing.updated_at = branch.updated_at;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("branch {}", branch.id))),
        }
    }

    async fn delete_branch(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.enter("delete_branch")?;
        state.branches.remove(&id);
        Ok(())
    }

    async fn get_branch(&self, tenant: &str, id: Uuid) -> StoreResult<Option<Branch>> {
        let state = self.enter("get_branch")?;
        Ok(state
            .branches
            .get(&id)
            .filter(|branch| branch.tenant_domain == tenant)
            .cloned())
    }

    async fn list_branches(&self, tenant: &str) -> StoreResult<Vec<Branch>> {
        let state = self.enter("list_branches")?;
        let mut branches: Vec<Branch> = state
            .branches
            .values()
            .filter(|branch| branch.tenant_domain == tenant)
            .cloned()
            .collect();
        branches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(branches)
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        let mut state = self.enter("insert_tenant")?;
        if state.tenants.contains_key(&tenant.domain) {
            return Err(StoreError::Conflict(format!("tenant {}", tenant.domain)));
        }
        state.tenants.insert(tenant.domain.clone(), tenant.clone());
        Ok(())
    }

    async fn update_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        let mut state = self.enter("update_tenant")?;
        match state.tenants.get_mut(&tenant.domain) {
            Some(existing) => {
                existing.name = tenant.name.clone();
                existing.description = tenant.description.clone();
                existing.updated_at = tenant.updated_at;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("tenant {}", tenant.domain))),
        }
    }

    async fn get_tenant(&self, domain: &str) -> StoreResult<Option<Tenant>> {
        let state = self.enter("get_tenant")?;
        Ok(state.tenants.get(domain).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::schema;
    use chrono::Utc;

    fn branch(tenant: &str, name: &str) -> Branch {
        let now = Utc::now();
        Branch {
            id: Uuid::new_v4(),
            tenant_domain: tenant.to_string(),
            group_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: String::new(),
            schema_name: format!("{}_{}", tenant, name.to_lowercase()),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_schema_is_a_conflict() {
        let store = MemoryPlatformStore::new();
        let main = branch("acme", "main");
        let rendered = schema::for_branch("acme", "main").unwrap();

        store.provision_branch_schema(&rendered, &main).await.unwrap();
        let err = store.provision_branch_schema(&rendered, &main).await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.schema_exists("acme_main"));
    }

    #[tokio::test]
    async fn branch_names_are_unique_per_tenant() {
        let store = MemoryPlatformStore::new();
        store.insert_branch(&branch("acme", "main")).await.unwrap();
        store.insert_branch(&branch("globex", "main")).await.unwrap();

        let err = store.insert_branch(&branch("acme", "main")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.list_branches("acme").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_branch_is_scoped_to_tenant() {
        let store = MemoryPlatformStore::new();
        let main = branch("acme", "main");
        store.insert_branch(&main).await.unwrap();

        assert!(store.get_branch("acme", main.id).await.unwrap().is_some());
        assert!(store.get_branch("globex", main.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_failures_are_recorded() {
        let store = MemoryPlatformStore::new();
        store.fail_on("insert_tenant");

        let now = Utc::now();
        let tenant = Tenant {
            domain: "acme".to_string(),
            name: "Acme".to_string(),
            description: String::new(),
            realm_id: "r1".to_string(),
            created_at: now,
            updated_at: now,
        };

        assert!(matches!(
            store.insert_tenant(&tenant).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.calls(), vec!["insert_tenant"]);
        assert!(store.tenant("acme").is_none());
    }
}
