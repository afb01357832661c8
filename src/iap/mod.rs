// Identity & Access Provider (IAP) administrative API.
//
// The provisioners only see the traits below. `http` talks to a real
// Keycloak-compatible admin API; `memory` keeps everything in process for
// local development and tests.

pub mod http;
pub mod memory;
pub mod token;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpIdentityProvider;
pub use memory::{MemoryIdentityProvider, MemoryRealm};
pub use token::{AccessToken, ClientCredentials, TokenCache, TokenSource};
pub use types::*;

#[derive(Debug, Error)]
pub enum IapError {
    #[error("identity provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("identity provider returned {status} for {operation}: {body}")]
    Status {
        status: u16,
        operation: String,
        body: String,
    },

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("token exchange failed: {0}")]
    Token(String),

    #[error("created object id missing from response to {0}")]
    MissingId(String),

    #[error("invalid identity provider url: {0}")]
    InvalidUrl(String),
}

/// Realm lifecycle. Deleting a realm removes everything scoped under it.
#[async_trait]
pub trait RealmApi: Send + Sync {
    async fn create_realm(&self, realm: &RealmRepresentation) -> Result<(), IapError>;
    async fn get_realm(&self, realm: &str) -> Result<RealmRepresentation, IapError>;
    async fn update_realm(&self, realm: &str, update: &RealmRepresentation) -> Result<(), IapError>;
    async fn delete_realm(&self, realm: &str) -> Result<(), IapError>;

    /// Drop any cached service-account credentials. Needed right after a
    /// realm is created, before the admin token can see it.
    async fn refresh_credentials(&self) -> Result<(), IapError>;
}

/// Groups back branches; membership grants branch access.
#[async_trait]
pub trait GroupApi: Send + Sync {
    /// Returns the id of the new group.
    async fn create_group(&self, realm: &str, group: &GroupRepresentation) -> Result<String, IapError>;
    async fn get_group(&self, realm: &str, group_id: &str) -> Result<GroupRepresentation, IapError>;
    async fn update_group(&self, realm: &str, group_id: &str, group: &GroupRepresentation) -> Result<(), IapError>;
    async fn delete_group(&self, realm: &str, group_id: &str) -> Result<(), IapError>;
    async fn add_group_member(&self, realm: &str, group_id: &str, user_id: &str) -> Result<(), IapError>;
    async fn remove_group_member(&self, realm: &str, group_id: &str, user_id: &str) -> Result<(), IapError>;
}

/// OAuth client registrations.
#[async_trait]
pub trait ClientApi: Send + Sync {
    /// Returns the internal id of the new client.
    async fn create_client(&self, realm: &str, client: &ClientRepresentation) -> Result<String, IapError>;
    /// Look a client up by its public `clientId`.
    async fn find_client(&self, realm: &str, client_id: &str) -> Result<Option<ClientRepresentation>, IapError>;
    async fn update_client(&self, realm: &str, id: &str, client: &ClientRepresentation) -> Result<(), IapError>;
    async fn delete_client(&self, realm: &str, id: &str) -> Result<(), IapError>;
}

/// Client-scoped roles and user role mappings.
#[async_trait]
pub trait RoleApi: Send + Sync {
    async fn create_client_role(&self, realm: &str, client: &str, role: &RoleRepresentation) -> Result<(), IapError>;
    async fn get_client_role(&self, realm: &str, client: &str, name: &str) -> Result<RoleRepresentation, IapError>;
    async fn delete_client_role(&self, realm: &str, client: &str, name: &str) -> Result<(), IapError>;
    async fn user_client_roles(&self, realm: &str, user_id: &str, client: &str) -> Result<Vec<RoleRepresentation>, IapError>;
    async fn assign_client_roles(
        &self,
        realm: &str,
        user_id: &str,
        client: &str,
        roles: &[RoleRepresentation],
    ) -> Result<(), IapError>;
}

/// Authorization engine of one client: scopes, resources, policies, permissions.
#[async_trait]
pub trait AuthorizationApi: Send + Sync {
    async fn find_scope(&self, realm: &str, client: &str, name: &str) -> Result<Option<ScopeRepresentation>, IapError>;
    async fn create_scope(&self, realm: &str, client: &str, scope: &ScopeRepresentation) -> Result<ScopeRepresentation, IapError>;

    async fn find_resource(&self, realm: &str, client: &str, name: &str) -> Result<Option<ResourceRepresentation>, IapError>;
    async fn create_resource(
        &self,
        realm: &str,
        client: &str,
        resource: &ResourceRepresentation,
    ) -> Result<ResourceRepresentation, IapError>;

    async fn find_policy(&self, realm: &str, client: &str, name: &str) -> Result<Option<PolicyRepresentation>, IapError>;
    async fn create_role_policy(
        &self,
        realm: &str,
        client: &str,
        policy: &PolicyRepresentation,
    ) -> Result<PolicyRepresentation, IapError>;
    async fn delete_policy(&self, realm: &str, client: &str, policy_id: &str) -> Result<(), IapError>;

    async fn find_permission(&self, realm: &str, client: &str, name: &str) -> Result<Option<PermissionRepresentation>, IapError>;
    /// Creates a scope- or resource-based permission depending on `permission.kind`.
    async fn create_permission(
        &self,
        realm: &str,
        client: &str,
        permission: &PermissionRepresentation,
    ) -> Result<PermissionRepresentation, IapError>;
}

#[async_trait]
pub trait UserApi: Send + Sync {
    /// Returns the id of the new user.
    async fn create_user(&self, realm: &str, user: &UserRepresentation) -> Result<String, IapError>;
}

/// Everything the provisioners need from the identity provider.
pub trait IdentityProvider: RealmApi + GroupApi + ClientApi + RoleApi + AuthorizationApi + UserApi {}

impl<T> IdentityProvider for T where T: RealmApi + GroupApi + ClientApi + RoleApi + AuthorizationApi + UserApi {}
