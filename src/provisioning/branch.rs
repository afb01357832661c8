use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::ProvisioningConfig;
use crate::database::{Branch, BranchPatch, NewBranch};
use crate::iap::{GroupRepresentation, IdentityProvider, RoleRepresentation};
use crate::provisioning::error::{ProvisionError, ProvisionResult};
use crate::provisioning::naming;
use crate::provisioning::rbac::{RbacGraphBuilder, RoleManager};
use crate::provisioning::registrar::{ClientKind, ClientRef, ClientRegistrar};
use crate::provisioning::saga::Saga;
use crate::provisioning::schema;
use crate::store::PlatformStore;

/// Creates and maintains branches: IAP group, OAuth client pair,
/// authorization graph, isolated schema and platform row.
#[derive(Clone)]
pub struct BranchProvisioner {
    iap: Arc<dyn IdentityProvider>,
    store: Arc<dyn PlatformStore>,
    config: Arc<ProvisioningConfig>,
}

impl BranchProvisioner {
    pub fn new(
        iap: Arc<dyn IdentityProvider>,
        store: Arc<dyn PlatformStore>,
        config: Arc<ProvisioningConfig>,
    ) -> Self {
        Self { iap, store, config }
    }

    /// Create a user-requested branch under an existing tenant.
    pub async fn create_branch(&self, tenant: &str, new: &NewBranch) -> ProvisionResult<Branch> {
        naming::validate_branch_name(&new.name)?;
        naming::validate_domain(tenant)?;

        self.require_tenant(tenant).await?;
        self.provision(tenant, &new.name, &new.description).await
    }

    /// Run the branch saga without the reserved-name check; tenant creation
    /// uses this for the admin branch.
    ///
    /// On failure the group is always deleted. The OAuth clients and the
    /// schema are only undone when compensation is strict.
    pub(crate) async fn provision(&self, tenant: &str, name: &str, description: &str) -> ProvisionResult<Branch> {
        let schema = schema::for_branch(tenant, name)?;
        let strict = self.config.compensation.strict;
        let registrar = ClientRegistrar::new(self.iap.as_ref(), &self.config);

        let mut saga = Saga::new(format!("branch {}/{}", tenant, name));

        let group_id = saga
            .step(
                "create group",
                self.iap.create_group(tenant, &GroupRepresentation::new(name, description)),
            )
            .await?;
        saga.on_rollback(format!("delete group {}", name), {
            let iap = self.iap.clone();
            let realm = tenant.to_string();
            let group_id = group_id.clone();
            async move { iap.delete_group(&realm, &group_id).await.map_err(ProvisionError::from) }
        });

        let frontend = saga
            .step("create frontend client", registrar.register(ClientKind::Frontend, tenant, name))
            .await?;
        if strict {
            saga.on_rollback(format!("delete client {}", frontend.client_id), self.delete_client(frontend));
        }

        let backend = saga
            .step("create backend client", registrar.register(ClientKind::Backend, tenant, name))
            .await?;
        if strict {
            saga.on_rollback(format!("delete client {}", backend.client_id), self.delete_client(backend));
        }

        saga.step("build authorization graph", async {
            let backend = registrar.resolve(ClientKind::Backend, tenant, name).await?;
            RbacGraphBuilder::new(self.iap.as_ref(), &self.config)
                .build(&backend, &self.config.role_names(), &self.config.permissions)
                .await
        })
        .await?;

        let now = Utc::now();
        let branch = Branch {
            id: Uuid::new_v4(),
            tenant_domain: tenant.to_string(),
            group_id,
            name: name.to_string(),
            description: description.to_string(),
            schema_name: schema.name.clone(),
            created_at: now,
            updated_at: now,
        };

        saga.step("provision schema", self.store.provision_branch_schema(&schema, &branch))
            .await?;
        if strict {
            saga.on_rollback(format!("drop schema {}", schema.name), {
                let store = self.store.clone();
                let schema_name = schema.name.clone();
                async move { store.drop_branch_schema(&schema_name).await.map_err(ProvisionError::from) }
            });
        }

        saga.step("persist branch", self.store.insert_branch(&branch)).await?;
        saga.complete();

        info!("Provisioned branch {} ({}) for tenant {}", branch.name, branch.id, tenant);
        Ok(branch)
    }

    pub async fn get_branch(&self, tenant: &str, id: Uuid) -> ProvisionResult<Branch> {
        self.store
            .get_branch(tenant, id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("branch {} of tenant {}", id, tenant)))
    }

    pub async fn list_branches(&self, tenant: &str) -> ProvisionResult<Vec<Branch>> {
        self.require_tenant(tenant).await?;
        Ok(self.store.list_branches(tenant).await?)
    }

    /// Rename and/or re-describe a branch. A rename moves the group and both
    /// client ids; the schema keeps the name it was created with.
    pub async fn update_branch(&self, tenant: &str, id: Uuid, patch: &BranchPatch) -> ProvisionResult<Branch> {
        let current = self.get_branch(tenant, id).await?;
        let mut updated = current.clone();
        if let Some(name) = patch.name.as_ref().filter(|name| **name != current.name) {
            if current.name == naming::ADMIN_BRANCH {
                return Err(ProvisionError::ReservedBranchName(current.name));
            }
            naming::validate_branch_name(name)?;
            updated.name = name.clone();
        }
        if let Some(description) = &patch.description {
            updated.description = description.clone();
        }
        updated.updated_at = Utc::now();

        let renamed = updated.name != current.name;
        let mut saga = Saga::new(format!("update branch {}/{}", tenant, current.name));

        saga.step(
            "update group",
            self.iap.update_group(
                tenant,
                &current.group_id,
                &GroupRepresentation::new(&updated.name, &updated.description),
            ),
        )
        .await?;
        saga.on_rollback(format!("restore group {}", current.name), {
            let iap = self.iap.clone();
            let realm = tenant.to_string();
            let group_id = current.group_id.clone();
            let previous = GroupRepresentation::new(&current.name, &current.description);
            async move { iap.update_group(&realm, &group_id, &previous).await.map_err(ProvisionError::from) }
        });

        if renamed {
            let registrar = ClientRegistrar::new(self.iap.as_ref(), &self.config);
            for kind in [ClientKind::Frontend, ClientKind::Backend] {
                saga.step(
                    &format!("rename {}", kind.client_id(&current.name)),
                    registrar.rename(kind, tenant, &current.name, &updated.name),
                )
                .await?;
                saga.on_rollback(format!("restore {}", kind.client_id(&current.name)), {
                    let iap = self.iap.clone();
                    let config = self.config.clone();
                    let realm = tenant.to_string();
                    let (from, to) = (updated.name.clone(), current.name.clone());
                    async move {
                        ClientRegistrar::new(iap.as_ref(), &config)
                            .rename(kind, &realm, &from, &to)
                            .await
                            .map(|_| ())
                    }
                });
            }
        }

        saga.step("update branch", self.store.update_branch(&updated)).await?;
        saga.complete();

        info!("Updated branch {} of tenant {}", updated.id, tenant);
        Ok(updated)
    }

    /// Back-end client of a branch; every role and permission lives under it.
    pub async fn backend_client(&self, tenant: &str, id: Uuid) -> ProvisionResult<ClientRef> {
        let branch = self.get_branch(tenant, id).await?;
        ClientRegistrar::new(self.iap.as_ref(), &self.config)
            .resolve(ClientKind::Backend, tenant, &branch.name)
            .await
    }

    pub async fn create_role(&self, tenant: &str, id: Uuid, name: &str, description: &str) -> ProvisionResult<RoleRepresentation> {
        naming::validate_role_name(name)?;
        if self.config.is_reserved_role(name) {
            return Err(ProvisionError::ReservedRoleName(name.to_string()));
        }
        let client = self.backend_client(tenant, id).await?;
        RoleManager::new(self.iap.as_ref(), &self.config)
            .create_role(&client, name, description)
            .await
    }

    pub async fn delete_role(&self, tenant: &str, id: Uuid, name: &str) -> ProvisionResult<()> {
        if self.config.is_reserved_role(name) {
            return Err(ProvisionError::ReservedRoleName(name.to_string()));
        }
        let client = self.backend_client(tenant, id).await?;
        RoleManager::new(self.iap.as_ref(), &self.config)
            .delete_role(&client, name)
            .await
    }

    pub async fn user_roles(&self, tenant: &str, id: Uuid, user_id: &str) -> ProvisionResult<Vec<RoleRepresentation>> {
        let client = self.backend_client(tenant, id).await?;
        RoleManager::new(self.iap.as_ref(), &self.config)
            .user_roles(&client, user_id)
            .await
    }

    async fn require_tenant(&self, tenant: &str) -> ProvisionResult<()> {
        match self.store.get_tenant(tenant).await? {
            Some(_) => Ok(()),
            None => Err(ProvisionError::NotFound(format!("tenant {}", tenant))),
        }
    }

    fn delete_client(&self, client: ClientRef) -> impl std::future::Future<Output = ProvisionResult<()>> + Send + 'static {
        let iap = self.iap.clone();
        async move { iap.delete_client(&client.realm, &client.id).await.map_err(ProvisionError::from) }
    }
}
