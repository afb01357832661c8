#![allow(dead_code)]

use std::sync::Arc;

use tenant_provisioner::config::ProvisioningConfig;
use tenant_provisioner::database::{NewTenant, ProvisionedTenant};
use tenant_provisioner::iap::{MemoryIdentityProvider, MemoryRealm};
use tenant_provisioner::provisioning::{BranchProvisioner, TenantProvisioner};
use tenant_provisioner::store::MemoryPlatformStore;

/// One role, one resource and a single grant: `operator` may `view` assets.
pub const SCENARIO: &str = r#"
roles:
  - name: operator
    description: Operates assets
resources:
  - name: asset
  - name: device
permissions:
  operator:
    asset-resource: [view]
frontend_client:
  root_url: https://{tenant}.example.com
  redirect_uris: ["https://{tenant}.example.com/{branch}/*"]
"#;

/// Provisioners wired to in-memory backends, with handles on both fakes
/// for failure injection and inspection.
pub struct Harness {
    pub iap: Arc<MemoryIdentityProvider>,
    pub store: Arc<MemoryPlatformStore>,
    pub tenants: TenantProvisioner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_strict_compensation(false)
    }

    pub fn with_strict_compensation(strict: bool) -> Self {
        let mut config = ProvisioningConfig::from_yaml(SCENARIO).expect("scenario config is valid");
        config.compensation.strict = strict;

        let iap = Arc::new(MemoryIdentityProvider::new());
        let store = Arc::new(MemoryPlatformStore::new());
        let tenants = TenantProvisioner::new(iap.clone(), store.clone(), Arc::new(config));

        Self { iap, store, tenants }
    }

    pub fn branches(&self) -> &BranchProvisioner {
        self.tenants.branches()
    }

    pub fn realm(&self, name: &str) -> MemoryRealm {
        self.iap.realm(name).unwrap_or_else(|| panic!("realm {} missing", name))
    }

    /// Provision `acme` with default branch `main`, then reset call logs.
    pub async fn seed_acme(&self) -> anyhow::Result<ProvisionedTenant> {
        let provisioned = self.tenants.create_tenant(&acme()).await?;
        self.iap.clear_calls();
        self.store.clear_calls();
        Ok(provisioned)
    }
}

pub fn acme() -> NewTenant {
    NewTenant {
        name: "Acme Corp".to_string(),
        domain: "acme".to_string(),
        description: "Widgets and gadgets".to_string(),
        admin_email: "ops@acme.io".to_string(),
        default_branch: "main".to_string(),
    }
}
