use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::ProvisioningConfig;
use crate::database::{Branch, NewTenant, ProvisionedTenant, Tenant, TenantPatch};
use crate::iap::{IdentityProvider, RealmRepresentation, UserRepresentation};
use crate::provisioning::branch::BranchProvisioner;
use crate::provisioning::error::{ProvisionError, ProvisionResult};
use crate::provisioning::naming;
use crate::provisioning::registrar::{ClientKind, ClientRegistrar};
use crate::provisioning::saga::Saga;
use crate::store::PlatformStore;

/// Creates tenants end to end: realm, default and admin branches, the
/// admin user and its role bindings, then the tenant row.
///
/// Any failure after the realm exists deletes the realm, which cascades to
/// every group, client and authorization object under it.
#[derive(Clone)]
pub struct TenantProvisioner {
    iap: Arc<dyn IdentityProvider>,
    store: Arc<dyn PlatformStore>,
    config: Arc<ProvisioningConfig>,
    branches: BranchProvisioner,
}

impl TenantProvisioner {
    pub fn new(
        iap: Arc<dyn IdentityProvider>,
        store: Arc<dyn PlatformStore>,
        config: Arc<ProvisioningConfig>,
    ) -> Self {
        let branches = BranchProvisioner::new(iap.clone(), store.clone(), config.clone());
        Self {
            iap,
            store,
            config,
            branches,
        }
    }

    pub fn branches(&self) -> &BranchProvisioner {
        &self.branches
    }

    pub async fn create_tenant(&self, new: &NewTenant) -> ProvisionResult<ProvisionedTenant> {
        validate(new)?;
        let domain = new.domain.as_str();
        let strict = self.config.compensation.strict;

        let mut saga = Saga::new(format!("tenant {}", domain));

        saga.step("create realm", self.iap.create_realm(&realm_representation(new)))
            .await?;
        saga.on_rollback(format!("delete realm {}", domain), {
            let iap = self.iap.clone();
            let realm = domain.to_string();
            async move { iap.delete_realm(&realm).await.map_err(ProvisionError::from) }
        });

        // The service account only sees the new realm after a token refresh.
        saga.step("refresh credentials", self.iap.refresh_credentials())
            .await?;
        let realm = saga.step("fetch realm", self.iap.get_realm(domain)).await?;

        let default_branch = saga
            .step(
                "create default branch",
                self.branches
                    .provision(domain, &new.default_branch, "Default branch"),
            )
            .await?;
        if strict {
            self.undo_branch_locally(&mut saga, &default_branch);
        }

        let admin_branch = saga
            .step(
                "create admin branch",
                self.branches
                    .provision(domain, naming::ADMIN_BRANCH, "Tenant administration"),
            )
            .await?;
        if strict {
            self.undo_branch_locally(&mut saga, &admin_branch);
        }

        let user = UserRepresentation {
            id: None,
            username: new.admin_email.clone(),
            email: Some(new.admin_email.clone()),
            enabled: true,
            email_verified: false,
        };
        let user_id = saga.step("create admin user", self.iap.create_user(domain, &user)).await?;

        saga.step("assign admin role", async {
            let backend = ClientRegistrar::new(self.iap.as_ref(), &self.config)
                .resolve(ClientKind::Backend, domain, &default_branch.name)
                .await?;
            let admin = self
                .iap
                .get_client_role(domain, &backend.id, naming::ADMIN_ROLE)
                .await?;
            self.iap
                .assign_client_roles(domain, &user_id, &backend.id, &[admin])
                .await?;
            Ok::<(), ProvisionError>(())
        })
        .await?;

        for branch in [&default_branch, &admin_branch] {
            saga.step(
                &format!("add admin user to group {}", branch.name),
                self.iap.add_group_member(domain, &branch.group_id, &user_id),
            )
            .await?;
        }

        let now = Utc::now();
        let tenant = Tenant {
            domain: domain.to_string(),
            name: new.name.clone(),
            description: new.description.clone(),
            realm_id: realm.id.unwrap_or_else(|| domain.to_string()),
            created_at: now,
            updated_at: now,
        };
        saga.step("persist tenant", self.store.insert_tenant(&tenant)).await?;
        saga.complete();

        info!("Provisioned tenant {} with branches {} and {}", domain, default_branch.name, admin_branch.name);
        Ok(ProvisionedTenant {
            tenant,
            default_branch,
            admin_branch,
            admin_user_id: user_id,
        })
    }

    pub async fn get_tenant(&self, domain: &str) -> ProvisionResult<Tenant> {
        self.store
            .get_tenant(domain)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("tenant {}", domain)))
    }

    /// Update the display name and description of a tenant, mirrored on its realm.
    pub async fn update_tenant(&self, domain: &str, patch: &TenantPatch) -> ProvisionResult<Tenant> {
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(ProvisionError::validation("name", "must not be empty"));
            }
        }

        let mut tenant = self.get_tenant(domain).await?;
        if let Some(name) = &patch.name {
            tenant.name = name.clone();
        }
        if let Some(description) = &patch.description {
            tenant.description = description.clone();
        }
        tenant.updated_at = Utc::now();

        let mut realm = self
            .iap
            .get_realm(domain)
            .await
            .map_err(|err| ProvisionError::from(err).in_step("fetch realm"))?;
        realm.display_name = Some(tenant.name.clone());
        realm
            .attributes
            .insert("description".to_string(), tenant.description.clone());
        self.iap
            .update_realm(domain, &realm)
            .await
            .map_err(|err| ProvisionError::from(err).in_step("update realm"))?;

        self.store
            .update_tenant(&tenant)
            .await
            .map_err(|err| ProvisionError::from(err).in_step("update tenant"))?;

        info!("Updated tenant {}", domain);
        Ok(tenant)
    }

    /// Drop the schema and the platform row of a branch if the tenant run fails
    /// later. Realm deletion covers the identity side.
    fn undo_branch_locally(&self, saga: &mut Saga<'_>, branch: &Branch) {
        let store = self.store.clone();
        let id = branch.id;
        let schema_name = branch.schema_name.clone();
        saga.on_rollback(format!("drop branch {}", branch.name), async move {
            store.delete_branch(id).await?;
            store.drop_branch_schema(&schema_name).await?;
            Ok::<(), ProvisionError>(())
        });
    }
}

fn validate(new: &NewTenant) -> ProvisionResult<()> {
    if new.name.trim().is_empty() {
        return Err(ProvisionError::validation("name", "must not be empty"));
    }
    naming::validate_domain(&new.domain)?;
    naming::validate_branch_name(&new.default_branch)?;
    if !is_plausible_email(&new.admin_email) {
        return Err(ProvisionError::validation("admin_email", "must be an email address"));
    }
    naming::schema_name(&new.domain, &new.default_branch)?;
    naming::schema_name(&new.domain, naming::ADMIN_BRANCH)?;
    Ok(())
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, host)) => {
            !local.is_empty()
                && host.contains('.')
                && !host.starts_with('.')
                && !host.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

fn realm_representation(new: &NewTenant) -> RealmRepresentation {
    let mut attributes = HashMap::new();
    attributes.insert("description".to_string(), new.description.clone());
    RealmRepresentation {
        id: None,
        realm: new.domain.clone(),
        display_name: Some(new.name.clone()),
        enabled: true,
        attributes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tenant() -> NewTenant {
        NewTenant {
            name: "Acme".to_string(),
            domain: "acme".to_string(),
            description: String::new(),
            admin_email: "ops@acme.io".to_string(),
            default_branch: "main".to_string(),
        }
    }

    #[test]
    fn accepts_well_formed_input() {
        assert!(validate(&new_tenant()).is_ok());
    }

    #[test]
    fn rejects_reserved_default_branch() {
        let mut input = new_tenant();
        input.default_branch = "admin".to_string();
        assert!(matches!(validate(&input), Err(ProvisionError::ReservedBranchName(_))));
    }

    #[test]
    fn rejects_malformed_email_and_domain() {
        let mut input = new_tenant();
        input.admin_email = "not-an-email".to_string();
        assert!(validate(&input).unwrap_err().is_validation());

        let mut input = new_tenant();
        input.domain = "Acme Corp".to_string();
        assert!(validate(&input).unwrap_err().is_validation());
    }

    #[test]
    fn realm_carries_display_name() {
        let realm = realm_representation(&new_tenant());
        assert_eq!(realm.realm, "acme");
        assert_eq!(realm.display_name.as_deref(), Some("Acme"));
        assert!(realm.enabled);
    }
}
