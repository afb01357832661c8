//! Authorization graph of one branch.
//!
//! Everything lives under the branch's back-end client and is built in a
//! strict order, because each layer references ids produced by the one
//! before it:
//!
//! 1. scopes (find-or-create by name)
//! 2. one role and its 1:1 policy for `admin` and every configured role
//! 3. resources with their allowed scopes
//! 4. one scope-based permission per matrix entry
//! 5. the resource-based `admin-permission` over the admin resource type
//!
//! Creation is not idempotent; running the build twice against the same
//! client fails on the first duplicate object.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{PermissionMatrix, ProvisioningConfig};
use crate::iap::{
    IdentityProvider, PermissionKind, PermissionRepresentation, PolicyRepresentation,
    ResourceRepresentation, RoleRepresentation, ScopeRepresentation,
};
use crate::provisioning::error::{ProvisionError, ProvisionResult};
use crate::provisioning::naming;
use crate::provisioning::registrar::ClientRef;

/// Ids of everything the builder created, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RbacGraph {
    pub scopes: BTreeMap<String, String>,
    /// role name -> role id
    pub roles: BTreeMap<String, String>,
    /// role name -> policy id
    pub policies: BTreeMap<String, String>,
    /// resource name -> resource id
    pub resources: BTreeMap<String, String>,
    /// permission name -> permission id
    pub permissions: BTreeMap<String, String>,
}

pub struct RbacGraphBuilder<'a> {
    iap: &'a dyn IdentityProvider,
    config: &'a ProvisioningConfig,
}

impl<'a> RbacGraphBuilder<'a> {
    pub fn new(iap: &'a dyn IdentityProvider, config: &'a ProvisioningConfig) -> Self {
        Self { iap, config }
    }

    pub async fn build(
        &self,
        client: &ClientRef,
        role_names: &[String],
        matrix: &PermissionMatrix,
    ) -> ProvisionResult<RbacGraph> {
        let roles = bootstrap_roles(role_names);
        self.check_matrix(&roles, matrix)?;

        let mut graph = RbacGraph::default();

        for scope in &self.config.scopes {
            let id = self
                .ensure_scope(client, scope)
                .await
                .map_err(|err| err.in_step(format!("create scope {}", scope)))?;
            graph.scopes.insert(scope.clone(), id);
        }

        for role in &roles {
            let description = self
                .config
                .role(role)
                .map(|template| template.description.clone())
                .unwrap_or_else(|| "Full access to the branch".to_string());
            let (role_id, policy_id) = create_role_with_policy(self.iap, client, role, &description).await?;
            graph.roles.insert(role.clone(), role_id);
            graph.policies.insert(role.clone(), policy_id);
        }

        for template in &self.config.resources {
            let name = template.resource_name();
            let resource = ResourceRepresentation {
                id: None,
                name: name.clone(),
                resource_type: Some(template.resource_type()),
                scopes: template
                    .allowed_scopes(&self.config.scopes)
                    .into_iter()
                    .map(|scope| ScopeRepresentation {
                        name: scope,
                        ..Default::default()
                    })
                    .collect(),
                owner_managed_access: false,
            };
            let created = self
                .iap
                .create_resource(&client.realm, &client.id, &resource)
                .await
                .map_err(|err| ProvisionError::from(err).in_step(format!("create resource {}", name)))?;
            graph.resources.insert(name.clone(), created_id(created.id, &name)?);
        }

        for (role, grants) in matrix {
            for (resource, scopes) in grants {
                let name = naming::scope_permission_name(role, resource);
                let permission = PermissionRepresentation {
                    name: name.clone(),
                    kind: PermissionKind::Scope,
                    resources: vec![lookup(&graph.resources, resource)?],
                    scopes: scopes
                        .iter()
                        .map(|scope| lookup(&graph.scopes, scope))
                        .collect::<ProvisionResult<_>>()?,
                    policies: vec![lookup(&graph.policies, role)?],
                    ..Default::default()
                };
                let id = self.create_permission(client, &permission).await?;
                graph.permissions.insert(name, id);
            }
        }

        let name = naming::resource_permission_name(naming::ADMIN_ROLE);
        let wildcard = PermissionRepresentation {
            name: name.clone(),
            description: Some("Full access to every admin-typed resource".to_string()),
            kind: PermissionKind::Resource,
            resource_type: Some(naming::ADMIN_RESOURCE_TYPE.to_string()),
            policies: vec![lookup(&graph.policies, naming::ADMIN_ROLE)?],
            ..Default::default()
        };
        let id = self.create_permission(client, &wildcard).await?;
        graph.permissions.insert(name, id);

        tracing::info!(
            "Built authorization graph for {}: {} roles, {} resources, {} permissions",
            client.client_id,
            graph.roles.len(),
            graph.resources.len(),
            graph.permissions.len()
        );
        Ok(graph)
    }

    /// Reject a matrix that references unknown roles, resources or scopes
    /// before anything is created.
    fn check_matrix(&self, roles: &[String], matrix: &PermissionMatrix) -> ProvisionResult<()> {
        for (role, grants) in matrix {
            if !roles.contains(role) {
                return Err(ProvisionError::validation(
                    "permissions",
                    format!("role {} is not provisioned", role),
                ));
            }
            for (resource, scopes) in grants {
                let template = self.config.resource(resource).ok_or_else(|| {
                    ProvisionError::validation("permissions", format!("unknown resource {}", resource))
                })?;
                let allowed = template.allowed_scopes(&self.config.scopes);
                if scopes.is_empty() {
                    return Err(ProvisionError::validation(
                        "permissions",
                        format!("{} on {} grants no scopes", role, resource),
                    ));
                }
                if let Some(scope) = scopes.iter().find(|scope| !allowed.contains(scope)) {
                    return Err(ProvisionError::validation(
                        "permissions",
                        format!("scope {} is not allowed on {}", scope, resource),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn ensure_scope(&self, client: &ClientRef, name: &str) -> ProvisionResult<String> {
        if let Some(existing) = self.iap.find_scope(&client.realm, &client.id, name).await? {
            return created_id(existing.id, name);
        }
        let created = self
            .iap
            .create_scope(
                &client.realm,
                &client.id,
                &ScopeRepresentation {
                    id: None,
                    name: name.to_string(),
                    display_name: Some(name.to_string()),
                },
            )
            .await?;
        created_id(created.id, name)
    }

    async fn create_permission(&self, client: &ClientRef, permission: &PermissionRepresentation) -> ProvisionResult<String> {
        let created = self
            .iap
            .create_permission(&client.realm, &client.id, permission)
            .await
            .map_err(|err| {
                ProvisionError::from(err).in_step(format!("create permission {}", permission.name))
            })?;
        created_id(created.id, &permission.name)
    }
}

/// Create a role, read back its id and create its dedicated policy.
/// Returns `(role id, policy id)`.
pub async fn create_role_with_policy(
    iap: &dyn IdentityProvider,
    client: &ClientRef,
    role: &str,
    description: &str,
) -> ProvisionResult<(String, String)> {
    let step = |err: crate::iap::IapError, what: &str| ProvisionError::from(err).in_step(format!("{} {}", what, role));

    iap.create_client_role(
        &client.realm,
        &client.id,
        &RoleRepresentation {
            name: role.to_string(),
            description: Some(description.to_string()),
            client_role: true,
            ..Default::default()
        },
    )
    .await
    .map_err(|err| step(err, "create role"))?;

    let created = iap
        .get_client_role(&client.realm, &client.id, role)
        .await
        .map_err(|err| step(err, "read role"))?;
    let role_id = created_id(created.id, role)?;

    let policy = PolicyRepresentation::for_roles(naming::policy_name(role), [role_id.clone()]);
    let policy = iap
        .create_role_policy(&client.realm, &client.id, &policy)
        .await
        .map_err(|err| step(err, "create policy for role"))?;
    let policy_id = created_id(policy.id, &naming::policy_name(role))?;

    Ok((role_id, policy_id))
}

/// Ad hoc role management after bootstrap. Roles keep the 1:1 policy pairing.
pub struct RoleManager<'a> {
    iap: &'a dyn IdentityProvider,
    config: &'a ProvisioningConfig,
}

impl<'a> RoleManager<'a> {
    pub fn new(iap: &'a dyn IdentityProvider, config: &'a ProvisioningConfig) -> Self {
        Self { iap, config }
    }

    pub async fn create_role(&self, client: &ClientRef, name: &str, description: &str) -> ProvisionResult<RoleRepresentation> {
        naming::validate_role_name(name)?;
        if self.config.is_reserved_role(name) {
            return Err(ProvisionError::ReservedRoleName(name.to_string()));
        }

        if let Err(err) = create_role_with_policy(self.iap, client, name, description).await {
            // The role exists unless the failure was creating it.
            if err.failed_step() != Some(format!("create role {}", name).as_str()) {
                if let Err(cleanup) = self.iap.delete_client_role(&client.realm, &client.id, name).await {
                    tracing::error!("Failed to remove role {} after policy failure: {}", name, cleanup);
                }
            }
            return Err(err);
        }
        let role = self.iap.get_client_role(&client.realm, &client.id, name).await?;
        tracing::info!("Created role {} on {}", name, client.client_id);
        Ok(role)
    }

    /// Delete the role's policy, then the role itself.
    pub async fn delete_role(&self, client: &ClientRef, name: &str) -> ProvisionResult<()> {
        if self.config.is_reserved_role(name) {
            return Err(ProvisionError::ReservedRoleName(name.to_string()));
        }

        let policy_name = naming::policy_name(name);
        if let Some(policy) = self.iap.find_policy(&client.realm, &client.id, &policy_name).await? {
            let id = created_id(policy.id, &policy_name)?;
            self.iap
                .delete_policy(&client.realm, &client.id, &id)
                .await
                .map_err(|err| ProvisionError::from(err).in_step(format!("delete policy {}", policy_name)))?;
        }
        self.iap
            .delete_client_role(&client.realm, &client.id, name)
            .await
            .map_err(|err| ProvisionError::from(err).in_step(format!("delete role {}", name)))?;

        tracing::info!("Deleted role {} from {}", name, client.client_id);
        Ok(())
    }

    pub async fn user_roles(&self, client: &ClientRef, user_id: &str) -> ProvisionResult<Vec<RoleRepresentation>> {
        Ok(self.iap.user_client_roles(&client.realm, user_id, &client.id).await?)
    }
}

/// `admin` first, then the configured roles without duplicates.
fn bootstrap_roles(role_names: &[String]) -> Vec<String> {
    let mut roles = vec![naming::ADMIN_ROLE.to_string()];
    for name in role_names {
        if !roles.contains(name) {
            roles.push(name.clone());
        }
    }
    roles
}

fn lookup(ids: &BTreeMap<String, String>, name: &str) -> ProvisionResult<String> {
    ids.get(name)
        .cloned()
        .ok_or_else(|| ProvisionError::NotFound(name.to_string()))
}

fn created_id(id: Option<String>, name: &str) -> ProvisionResult<String> {
    id.ok_or_else(|| ProvisionError::NotFound(format!("id of {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iap::{ClientApi, ClientRepresentation, MemoryIdentityProvider, RealmApi, RealmRepresentation};

    const CONFIG: &str = r#"
roles:
  - name: operator
resources:
  - name: asset
  - name: device
    scopes: [view]
permissions:
  operator:
    asset-resource: [view]
"#;

    async fn backend(iap: &MemoryIdentityProvider) -> ClientRef {
        iap.create_realm(&RealmRepresentation {
            realm: "acme".to_string(),
            enabled: true,
            ..Default::default()
        })
        .await
        .unwrap();
        let id = iap
            .create_client(
                "acme",
                &ClientRepresentation {
                    client_id: "main-backend".to_string(),
                    authorization_services_enabled: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        ClientRef {
            realm: "acme".to_string(),
            id,
            client_id: "main-backend".to_string(),
        }
    }

    #[tokio::test]
    async fn builds_scenario_graph() {
        let iap = MemoryIdentityProvider::new();
        let client = backend(&iap).await;
        let config = ProvisioningConfig::from_yaml(CONFIG).unwrap();

        let graph = RbacGraphBuilder::new(&iap, &config)
            .build(&client, &config.role_names(), &config.permissions)
            .await
            .unwrap();

        assert_eq!(graph.roles.keys().collect::<Vec<_>>(), vec!["admin", "operator"]);
        assert_eq!(graph.policies.len(), 2);
        assert_eq!(
            graph.permissions.keys().collect::<Vec<_>>(),
            vec!["admin-permission", "operator-asset-resource-permission"]
        );

        let stored = iap.realm("acme").unwrap();
        let stored = stored.client_by_client_id("main-backend").unwrap();
        let permission = stored
            .permissions
            .iter()
            .find(|p| p.name == "operator-asset-resource-permission")
            .unwrap();
        assert_eq!(permission.kind, PermissionKind::Scope);
        assert_eq!(permission.resources, vec![graph.resources["asset-resource"].clone()]);
        assert_eq!(permission.scopes, vec![graph.scopes["view"].clone()]);
        assert_eq!(permission.policies, vec![graph.policies["operator"].clone()]);

        let wildcard = stored.permissions.iter().find(|p| p.name == "admin-permission").unwrap();
        assert_eq!(wildcard.kind, PermissionKind::Resource);
        assert_eq!(wildcard.resource_type.as_deref(), Some("admin"));
        assert_eq!(wildcard.policies, vec![graph.policies["admin"].clone()]);

        let device = stored.resources.iter().find(|r| r.name == "device-resource").unwrap();
        assert_eq!(device.scopes.len(), 1);
    }

    #[tokio::test]
    async fn runs_layers_in_dependency_order() {
        let iap = MemoryIdentityProvider::new();
        let client = backend(&iap).await;
        let config = ProvisioningConfig::from_yaml(CONFIG).unwrap();
        iap.clear_calls();

        RbacGraphBuilder::new(&iap, &config)
            .build(&client, &config.role_names(), &config.permissions)
            .await
            .unwrap();

        let creates: Vec<String> = iap
            .calls()
            .into_iter()
            .filter(|call| call.starts_with("create_"))
            .collect();
        let last_scope = creates.iter().rposition(|c| c == "create_scope").unwrap();
        let first_role = creates.iter().position(|c| c == "create_client_role").unwrap();
        let last_policy = creates.iter().rposition(|c| c == "create_role_policy").unwrap();
        let first_resource = creates.iter().position(|c| c == "create_resource").unwrap();
        let last_resource = creates.iter().rposition(|c| c == "create_resource").unwrap();
        let first_permission = creates.iter().position(|c| c == "create_permission").unwrap();

        assert!(last_scope < first_role);
        assert!(last_policy < first_resource);
        assert!(last_resource < first_permission);
    }

    #[tokio::test]
    async fn second_build_conflicts() {
        let iap = MemoryIdentityProvider::new();
        let client = backend(&iap).await;
        let config = ProvisioningConfig::from_yaml(CONFIG).unwrap();
        let builder = RbacGraphBuilder::new(&iap, &config);

        builder.build(&client, &config.role_names(), &config.permissions).await.unwrap();
        let err = builder
            .build(&client, &config.role_names(), &config.permissions)
            .await
            .unwrap_err();

        assert_eq!(err.failed_step(), Some("create role admin"));
        assert!(matches!(
            err.root_cause(),
            ProvisionError::Iap(crate::iap::IapError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn invalid_matrix_is_rejected_before_any_call() {
        let iap = MemoryIdentityProvider::new();
        let client = backend(&iap).await;
        let config = ProvisioningConfig::from_yaml(CONFIG).unwrap();
        iap.clear_calls();

        let mut matrix = PermissionMatrix::new();
        matrix
            .entry("auditor".to_string())
            .or_default()
            .insert("asset-resource".to_string(), vec!["view".to_string()]);

        let err = RbacGraphBuilder::new(&iap, &config)
            .build(&client, &config.role_names(), &matrix)
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert!(iap.calls().is_empty());
    }

    #[tokio::test]
    async fn role_manager_rejects_bootstrap_names() {
        let iap = MemoryIdentityProvider::new();
        let client = backend(&iap).await;
        let config = ProvisioningConfig::from_yaml(CONFIG).unwrap();
        let roles = RoleManager::new(&iap, &config);
        iap.clear_calls();

        for name in ["admin", "operator"] {
            let err = roles.create_role(&client, name, "").await.unwrap_err();
            assert!(matches!(err, ProvisionError::ReservedRoleName(_)));
        }
        assert!(iap.calls().is_empty());
    }

    #[tokio::test]
    async fn role_manager_pairs_role_and_policy() {
        let iap = MemoryIdentityProvider::new();
        let client = backend(&iap).await;
        let config = ProvisioningConfig::from_yaml(CONFIG).unwrap();
        let roles = RoleManager::new(&iap, &config);

        let role = roles.create_role(&client, "auditor", "Reads audit trails").await.unwrap();
        assert_eq!(role.name, "auditor");

        let stored = iap.realm("acme").unwrap();
        let backend = stored.client_by_client_id("main-backend").unwrap();
        let policy = backend.policies.iter().find(|p| p.name == "auditor-policy").unwrap();
        assert_eq!(policy.roles.len(), 1);
        assert_eq!(Some(policy.roles[0].id.clone()), role.id);

        roles.delete_role(&client, "auditor").await.unwrap();
        let stored = iap.realm("acme").unwrap();
        let backend = stored.client_by_client_id("main-backend").unwrap();
        assert!(!backend.roles.contains_key("auditor"));
        assert!(backend.policies.iter().all(|p| p.name != "auditor-policy"));
    }
}
