use serde::{Deserialize, Serialize};

use crate::config::{ClientTemplate, ProvisioningConfig};
use crate::iap::{ClientRepresentation, IdentityProvider};
use crate::provisioning::error::{ProvisionError, ProvisionResult};
use crate::provisioning::naming;

/// The two OAuth registrations every branch owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    /// Public client used by the browser front end.
    Frontend,
    /// Confidential client with authorization services; owns the RBAC graph.
    Backend,
}

impl ClientKind {
    pub fn client_id(&self, branch: &str) -> String {
        match self {
            ClientKind::Frontend => naming::frontend_client_id(branch),
            ClientKind::Backend => naming::backend_client_id(branch),
        }
    }

    fn template<'c>(&self, config: &'c ProvisioningConfig) -> &'c ClientTemplate {
        match self {
            ClientKind::Frontend => &config.frontend_client,
            ClientKind::Backend => &config.backend_client,
        }
    }
}

/// Resolved client: realm plus both the internal id (used in admin API
/// paths) and the public client id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRef {
    pub realm: String,
    pub id: String,
    pub client_id: String,
}

pub struct ClientRegistrar<'a> {
    iap: &'a dyn IdentityProvider,
    config: &'a ProvisioningConfig,
}

impl<'a> ClientRegistrar<'a> {
    pub fn new(iap: &'a dyn IdentityProvider, config: &'a ProvisioningConfig) -> Self {
        Self { iap, config }
    }

    /// Registration payload for one client of `branch`.
    pub fn representation(&self, kind: ClientKind, tenant: &str, branch: &str) -> ClientRepresentation {
        let urls = kind.template(self.config).render(tenant, branch);
        let confidential = kind == ClientKind::Backend;

        ClientRepresentation {
            id: None,
            client_id: kind.client_id(branch),
            name: Some(kind.client_id(branch)),
            description: Some(format!("{} client of branch {}", kind_label(kind), branch)),
            enabled: true,
            public_client: !confidential,
            standard_flow_enabled: true,
            direct_access_grants_enabled: confidential,
            service_accounts_enabled: confidential,
            authorization_services_enabled: confidential,
            root_url: urls.root_url,
            admin_url: urls.admin_url,
            redirect_uris: urls.redirect_uris,
            web_origins: urls.web_origins,
        }
    }

    pub async fn register(&self, kind: ClientKind, tenant: &str, branch: &str) -> ProvisionResult<ClientRef> {
        let client = self.representation(kind, tenant, branch);
        let id = self.iap.create_client(tenant, &client).await?;
        tracing::info!("Registered {} client {} in realm {}", kind_label(kind), client.client_id, tenant);

        Ok(ClientRef {
            realm: tenant.to_string(),
            id,
            client_id: client.client_id,
        })
    }

    /// Look a branch client up by its deterministic client id.
    pub async fn resolve(&self, kind: ClientKind, tenant: &str, branch: &str) -> ProvisionResult<ClientRef> {
        let client_id = kind.client_id(branch);
        let client = self
            .iap
            .find_client(tenant, &client_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("client {} in realm {}", client_id, tenant)))?;
        let id = client
            .id
            .ok_or_else(|| ProvisionError::NotFound(format!("id of client {}", client_id)))?;

        Ok(ClientRef {
            realm: tenant.to_string(),
            id,
            client_id,
        })
    }

    /// Move a branch's client to the client id derived from `new_branch`.
    pub async fn rename(&self, kind: ClientKind, tenant: &str, branch: &str, new_branch: &str) -> ProvisionResult<ClientRef> {
        let current = self.resolve(kind, tenant, branch).await?;
        let mut client = self.representation(kind, tenant, new_branch);
        client.id = Some(current.id.clone());
        self.iap.update_client(tenant, &current.id, &client).await?;

        Ok(ClientRef {
            client_id: client.client_id,
            ..current
        })
    }
}

fn kind_label(kind: ClientKind) -> &'static str {
    match kind {
        ClientKind::Frontend => "frontend",
        ClientKind::Backend => "backend",
    }
}
