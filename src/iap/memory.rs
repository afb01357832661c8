//! In-memory identity provider.
//!
//! Implements every IAP trait against plain maps guarded by a mutex. It
//! exists for local development and tests:
//! - create operations fail with [`IapError::Conflict`] on duplicate names,
//!   matching the create-only semantics of the real admin API
//! - deleting a realm drops everything scoped under it
//! - every call is recorded, and individual operations can be made to fail
//!   to exercise compensation paths
//!
//! Nothing is durable and nothing is shared across processes.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::iap::{
    AuthorizationApi, ClientApi, ClientRepresentation, GroupApi, GroupRepresentation, IapError,
    PermissionRepresentation, PolicyRepresentation, RealmApi, RealmRepresentation,
    ResourceRepresentation, RoleApi, RoleRepresentation, ScopeRepresentation, UserApi,
    UserRepresentation,
};

/// Authorization objects of one client.
#[derive(Debug, Clone, Default)]
pub struct MemoryClient {
    pub client: ClientRepresentation,
    pub roles: BTreeMap<String, RoleRepresentation>,
    pub scopes: Vec<ScopeRepresentation>,
    pub resources: Vec<ResourceRepresentation>,
    pub policies: Vec<PolicyRepresentation>,
    pub permissions: Vec<PermissionRepresentation>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryUser {
    pub user: UserRepresentation,
    pub groups: HashSet<String>,
    /// client id -> assigned role names
    pub client_roles: HashMap<String, Vec<String>>,
}

/// Everything scoped under one realm.
#[derive(Debug, Clone, Default)]
pub struct MemoryRealm {
    pub realm: RealmRepresentation,
    pub groups: BTreeMap<String, GroupRepresentation>,
    pub clients: BTreeMap<String, MemoryClient>,
    pub users: BTreeMap<String, MemoryUser>,
}

impl MemoryRealm {
    pub fn group_named(&self, name: &str) -> Option<&GroupRepresentation> {
        self.groups.values().find(|group| group.name == name)
    }

    pub fn client_by_client_id(&self, client_id: &str) -> Option<&MemoryClient> {
        self.clients
            .values()
            .find(|client| client.client.client_id == client_id)
    }

    pub fn user_named(&self, username: &str) -> Option<&MemoryUser> {
        self.users.values().find(|user| user.user.username == username)
    }
}

#[derive(Default)]
struct State {
    realms: BTreeMap<String, MemoryRealm>,
    calls: Vec<String>,
    failures: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryIdentityProvider {
    state: Mutex<State>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future call of `operation` (e.g. `"create_group"`) fail.
    pub fn fail_on(&self, operation: &str) {
        self.lock().failures.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Operation names in call order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn realm(&self, name: &str) -> Option<MemoryRealm> {
        self.lock().realms.get(name).cloned()
    }

    pub fn realm_exists(&self, name: &str) -> bool {
        self.lock().realms.contains_key(name)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call and take the lock, or fail if the operation is rigged to.
    fn enter(&self, operation: &str) -> Result<MutexGuard<'_, State>, IapError> {
        let mut state = self.lock();
        state.calls.push(operation.to_string());
        if state.failures.contains(operation) {
            return Err(IapError::Status {
                status: 500,
                operation: operation.to_string(),
                body: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

fn realm_mut<'a>(state: &'a mut State, realm: &str) -> Result<&'a mut MemoryRealm, IapError> {
    state
        .realms
        .get_mut(realm)
        .ok_or_else(|| IapError::NotFound(format!("realm {}", realm)))
}

fn client_mut<'a>(state: &'a mut State, realm: &str, client: &str) -> Result<&'a mut MemoryClient, IapError> {
    realm_mut(state, realm)?
        .clients
        .get_mut(client)
        .ok_or_else(|| IapError::NotFound(format!("client {}", client)))
}

/// First id in `wanted` that is not among `known`.
fn missing_id<'a>(wanted: &'a [String], known: &[Option<String>]) -> Option<&'a String> {
    wanted
        .iter()
        .find(|id| !known.iter().any(|k| k.as_deref() == Some(id.as_str())))
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[async_trait]
impl RealmApi for MemoryIdentityProvider {
    async fn create_realm(&self, realm: &RealmRepresentation) -> Result<(), IapError> {
        let mut state = self.enter("create_realm")?;
        if state.realms.contains_key(&realm.realm) {
            return Err(IapError::Conflict(format!("realm {}", realm.realm)));
        }
        let mut stored = realm.clone();
        stored.id = Some(new_id());
        state.realms.insert(
            realm.realm.clone(),
            MemoryRealm {
                realm: stored,
                ..Default::default()
            },
        );
        Ok(())
    }

    async fn get_realm(&self, realm: &str) -> Result<RealmRepresentation, IapError> {
        let mut state = self.enter("get_realm")?;
        Ok(realm_mut(&mut state, realm)?.realm.clone())
    }

    async fn update_realm(&self, realm: &str, update: &RealmRepresentation) -> Result<(), IapError> {
        let mut state = self.enter("update_realm")?;
        let stored = realm_mut(&mut state, realm)?;
        let id = stored.realm.id.clone();
        stored.realm = RealmRepresentation {
            id,
            realm: realm.to_string(),
            ..update.clone()
        };
        Ok(())
    }

    async fn delete_realm(&self, realm: &str) -> Result<(), IapError> {
        let mut state = self.enter("delete_realm")?;
        state
            .realms
            .remove(realm)
            .map(|_| ())
            .ok_or_else(|| IapError::NotFound(format!("realm {}", realm)))
    }

    async fn refresh_credentials(&self) -> Result<(), IapError> {
        self.enter("refresh_credentials").map(|_| ())
    }
}

#[async_trait]
impl GroupApi for MemoryIdentityProvider {
    async fn create_group(&self, realm: &str, group: &GroupRepresentation) -> Result<String, IapError> {
        let mut state = self.enter("create_group")?;
        let stored = realm_mut(&mut state, realm)?;
        if stored.group_named(&group.name).is_some() {
            return Err(IapError::Conflict(format!("group {}", group.name)));
        }
        let id = new_id();
        let mut group = group.clone();
        group.id = Some(id.clone());
        stored.groups.insert(id.clone(), group);
        Ok(id)
    }

    async fn get_group(&self, realm: &str, group_id: &str) -> Result<GroupRepresentation, IapError> {
        let mut state = self.enter("get_group")?;
        realm_mut(&mut state, realm)?
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| IapError::NotFound(format!("group {}", group_id)))
    }

    async fn update_group(&self, realm: &str, group_id: &str, group: &GroupRepresentation) -> Result<(), IapError> {
        let mut state = self.enter("update_group")?;
        let stored = realm_mut(&mut state, realm)?;
        if stored
            .groups
            .values()
            .any(|other| other.name == group.name && other.id.as_deref() != Some(group_id))
        {
            return Err(IapError::Conflict(format!("group {}", group.name)));
        }
        let existing = stored
            .groups
            .get_mut(group_id)
            .ok_or_else(|| IapError::NotFound(format!("group {}", group_id)))?;
        *existing = GroupRepresentation {
            id: Some(group_id.to_string()),
            ..group.clone()
        };
        Ok(())
    }

    async fn delete_group(&self, realm: &str, group_id: &str) -> Result<(), IapError> {
        let mut state = self.enter("delete_group")?;
        let stored = realm_mut(&mut state, realm)?;
        stored
            .groups
            .remove(group_id)
            .ok_or_else(|| IapError::NotFound(format!("group {}", group_id)))?;
        for user in stored.users.values_mut() {
            user.groups.remove(group_id);
        }
        Ok(())
    }

    async fn add_group_member(&self, realm: &str, group_id: &str, user_id: &str) -> Result<(), IapError> {
        let mut state = self.enter("add_group_member")?;
        let stored = realm_mut(&mut state, realm)?;
        if !stored.groups.contains_key(group_id) {
            return Err(IapError::NotFound(format!("group {}", group_id)));
        }
        stored
            .users
            .get_mut(user_id)
            .ok_or_else(|| IapError::NotFound(format!("user {}", user_id)))?
            .groups
            .insert(group_id.to_string());
        Ok(())
    }

    async fn remove_group_member(&self, realm: &str, group_id: &str, user_id: &str) -> Result<(), IapError> {
        let mut state = self.enter("remove_group_member")?;
        realm_mut(&mut state, realm)?
            .users
            .get_mut(user_id)
            .ok_or_else(|| IapError::NotFound(format!("user {}", user_id)))?
            .groups
            .remove(group_id);
        Ok(())
    }
}

#[async_trait]
impl ClientApi for MemoryIdentityProvider {
    async fn create_client(&self, realm: &str, client: &ClientRepresentation) -> Result<String, IapError> {
        let mut state = self.enter("create_client")?;
        let stored = realm_mut(&mut state, realm)?;
        if stored.client_by_client_id(&client.client_id).is_some() {
            return Err(IapError::Conflict(format!("client {}", client.client_id)));
        }
        let id = new_id();
        let mut client = client.clone();
        client.id = Some(id.clone());
        stored.clients.insert(
            id.clone(),
            MemoryClient {
                client,
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn find_client(&self, realm: &str, client_id: &str) -> Result<Option<ClientRepresentation>, IapError> {
        let mut state = self.enter("find_client")?;
        Ok(realm_mut(&mut state, realm)?
            .client_by_client_id(client_id)
            .map(|client| client.client.clone()))
    }

    async fn update_client(&self, realm: &str, id: &str, client: &ClientRepresentation) -> Result<(), IapError> {
        let mut state = self.enter("update_client")?;
        let stored = client_mut(&mut state, realm, id)?;
        stored.client = ClientRepresentation {
            id: Some(id.to_string()),
            ..client.clone()
        };
        Ok(())
    }

    async fn delete_client(&self, realm: &str, id: &str) -> Result<(), IapError> {
        let mut state = self.enter("delete_client")?;
        let stored = realm_mut(&mut state, realm)?;
        stored
            .clients
            .remove(id)
            .ok_or_else(|| IapError::NotFound(format!("client {}", id)))?;
        for user in stored.users.values_mut() {
            user.client_roles.remove(id);
        }
        Ok(())
    }
}

#[async_trait]
impl RoleApi for MemoryIdentityProvider {
    async fn create_client_role(&self, realm: &str, client: &str, role: &RoleRepresentation) -> Result<(), IapError> {
        let mut state = self.enter("create_client_role")?;
        let stored = client_mut(&mut state, realm, client)?;
        if stored.roles.contains_key(&role.name) {
            return Err(IapError::Conflict(format!("role {}", role.name)));
        }
        let role = RoleRepresentation {
            id: Some(new_id()),
            client_role: true,
            container_id: Some(client.to_string()),
            ..role.clone()
        };
        stored.roles.insert(role.name.clone(), role);
        Ok(())
    }

    async fn get_client_role(&self, realm: &str, client: &str, name: &str) -> Result<RoleRepresentation, IapError> {
        let mut state = self.enter("get_client_role")?;
        client_mut(&mut state, realm, client)?
            .roles
            .get(name)
            .cloned()
            .ok_or_else(|| IapError::NotFound(format!("role {}", name)))
    }

    async fn delete_client_role(&self, realm: &str, client: &str, name: &str) -> Result<(), IapError> {
        let mut state = self.enter("delete_client_role")?;
        let stored = realm_mut(&mut state, realm)?;
        stored
            .clients
            .get_mut(client)
            .ok_or_else(|| IapError::NotFound(format!("client {}", client)))?
            .roles
            .remove(name)
            .ok_or_else(|| IapError::NotFound(format!("role {}", name)))?;
        for user in stored.users.values_mut() {
            if let Some(roles) = user.client_roles.get_mut(client) {
                roles.retain(|role| role != name);
            }
        }
        Ok(())
    }

    async fn user_client_roles(&self, realm: &str, user_id: &str, client: &str) -> Result<Vec<RoleRepresentation>, IapError> {
        let mut state = self.enter("user_client_roles")?;
        let stored = realm_mut(&mut state, realm)?;
        let names = stored
            .users
            .get(user_id)
            .ok_or_else(|| IapError::NotFound(format!("user {}", user_id)))?
            .client_roles
            .get(client)
            .cloned()
            .unwrap_or_default();
        let roles = &stored
            .clients
            .get(client)
            .ok_or_else(|| IapError::NotFound(format!("client {}", client)))?
            .roles;
        Ok(names.iter().filter_map(|name| roles.get(name).cloned()).collect())
    }

    async fn assign_client_roles(
        &self,
        realm: &str,
        user_id: &str,
        client: &str,
        roles: &[RoleRepresentation],
    ) -> Result<(), IapError> {
        let mut state = self.enter("assign_client_roles")?;
        let stored = realm_mut(&mut state, realm)?;
        let known = &stored
            .clients
            .get(client)
            .ok_or_else(|| IapError::NotFound(format!("client {}", client)))?
            .roles;
        if let Some(missing) = roles.iter().find(|role| !known.contains_key(&role.name)) {
            return Err(IapError::NotFound(format!("role {}", missing.name)));
        }
        let assigned = stored
            .users
            .get_mut(user_id)
            .ok_or_else(|| IapError::NotFound(format!("user {}", user_id)))?
            .client_roles
            .entry(client.to_string())
            .or_default();
        for role in roles {
            if !assigned.contains(&role.name) {
                assigned.push(role.name.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AuthorizationApi for MemoryIdentityProvider {
    async fn find_scope(&self, realm: &str, client: &str, name: &str) -> Result<Option<ScopeRepresentation>, IapError> {
        let mut state = self.enter("find_scope")?;
        Ok(client_mut(&mut state, realm, client)?
            .scopes
            .iter()
            .find(|scope| scope.name == name)
            .cloned())
    }

    async fn create_scope(&self, realm: &str, client: &str, scope: &ScopeRepresentation) -> Result<ScopeRepresentation, IapError> {
        let mut state = self.enter("create_scope")?;
        let stored = client_mut(&mut state, realm, client)?;
        if stored.scopes.iter().any(|existing| existing.name == scope.name) {
            return Err(IapError::Conflict(format!("scope {}", scope.name)));
        }
        let scope = ScopeRepresentation {
            id: Some(new_id()),
            ..scope.clone()
        };
        stored.scopes.push(scope.clone());
        Ok(scope)
    }

    async fn find_resource(&self, realm: &str, client: &str, name: &str) -> Result<Option<ResourceRepresentation>, IapError> {
        let mut state = self.enter("find_resource")?;
        Ok(client_mut(&mut state, realm, client)?
            .resources
            .iter()
            .find(|resource| resource.name == name)
            .cloned())
    }

    async fn create_resource(
        &self,
        realm: &str,
        client: &str,
        resource: &ResourceRepresentation,
    ) -> Result<ResourceRepresentation, IapError> {
        let mut state = self.enter("create_resource")?;
        let stored = client_mut(&mut state, realm, client)?;
        if stored.resources.iter().any(|existing| existing.name == resource.name) {
            return Err(IapError::Conflict(format!("resource {}", resource.name)));
        }
        let mut scopes = Vec::with_capacity(resource.scopes.len());
        for wanted in &resource.scopes {
            let scope = stored
                .scopes
                .iter()
                .find(|scope| scope.name == wanted.name)
                .ok_or_else(|| IapError::NotFound(format!("scope {}", wanted.name)))?;
            scopes.push(scope.clone());
        }
        let resource = ResourceRepresentation {
            id: Some(new_id()),
            scopes,
            ..resource.clone()
        };
        stored.resources.push(resource.clone());
        Ok(resource)
    }

    async fn find_policy(&self, realm: &str, client: &str, name: &str) -> Result<Option<PolicyRepresentation>, IapError> {
        let mut state = self.enter("find_policy")?;
        Ok(client_mut(&mut state, realm, client)?
            .policies
            .iter()
            .find(|policy| policy.name == name)
            .cloned())
    }

    async fn create_role_policy(
        &self,
        realm: &str,
        client: &str,
        policy: &PolicyRepresentation,
    ) -> Result<PolicyRepresentation, IapError> {
        let mut state = self.enter("create_role_policy")?;
        let stored = client_mut(&mut state, realm, client)?;
        if stored.policies.iter().any(|existing| existing.name == policy.name) {
            return Err(IapError::Conflict(format!("policy {}", policy.name)));
        }
        if policy.roles.is_empty() {
            return Err(IapError::Status {
                status: 400,
                operation: "create_role_policy".to_string(),
                body: "role policy needs at least one role".to_string(),
            });
        }
        for role in &policy.roles {
            if !stored.roles.values().any(|known| known.id.as_deref() == Some(role.id.as_str())) {
                return Err(IapError::NotFound(format!("role {}", role.id)));
            }
        }
        let policy = PolicyRepresentation {
            id: Some(new_id()),
            ..policy.clone()
        };
        stored.policies.push(policy.clone());
        Ok(policy)
    }

    async fn delete_policy(&self, realm: &str, client: &str, policy_id: &str) -> Result<(), IapError> {
        let mut state = self.enter("delete_policy")?;
        let stored = client_mut(&mut state, realm, client)?;
        let before = stored.policies.len();
        stored.policies.retain(|policy| policy.id.as_deref() != Some(policy_id));
        if stored.policies.len() == before {
            return Err(IapError::NotFound(format!("policy {}", policy_id)));
        }
        for permission in &mut stored.permissions {
            permission.policies.retain(|id| id != policy_id);
        }
        Ok(())
    }

    async fn find_permission(&self, realm: &str, client: &str, name: &str) -> Result<Option<PermissionRepresentation>, IapError> {
        let mut state = self.enter("find_permission")?;
        Ok(client_mut(&mut state, realm, client)?
            .permissions
            .iter()
            .find(|permission| permission.name == name)
            .cloned())
    }

    async fn create_permission(
        &self,
        realm: &str,
        client: &str,
        permission: &PermissionRepresentation,
    ) -> Result<PermissionRepresentation, IapError> {
        let mut state = self.enter("create_permission")?;
        let stored = client_mut(&mut state, realm, client)?;
        if stored.permissions.iter().any(|existing| existing.name == permission.name) {
            return Err(IapError::Conflict(format!("permission {}", permission.name)));
        }
        let resources: Vec<_> = stored.resources.iter().map(|r| r.id.clone()).collect();
        if let Some(id) = missing_id(&permission.resources, &resources) {
            return Err(IapError::NotFound(format!("resource {}", id)));
        }
        let scopes: Vec<_> = stored.scopes.iter().map(|s| s.id.clone()).collect();
        if let Some(id) = missing_id(&permission.scopes, &scopes) {
            return Err(IapError::NotFound(format!("scope {}", id)));
        }
        let policies: Vec<_> = stored.policies.iter().map(|p| p.id.clone()).collect();
        if let Some(id) = missing_id(&permission.policies, &policies) {
            return Err(IapError::NotFound(format!("policy {}", id)));
        }
        let permission = PermissionRepresentation {
            id: Some(new_id()),
            ..permission.clone()
        };
        stored.permissions.push(permission.clone());
        Ok(permission)
    }
}

#[async_trait]
impl UserApi for MemoryIdentityProvider {
    async fn create_user(&self, realm: &str, user: &UserRepresentation) -> Result<String, IapError> {
        let mut state = self.enter("create_user")?;
        let stored = realm_mut(&mut state, realm)?;
        if stored.user_named(&user.username).is_some() {
            return Err(IapError::Conflict(format!("user {}", user.username)));
        }
        let id = new_id();
        stored.users.insert(
            id.clone(),
            MemoryUser {
                user: UserRepresentation {
                    id: Some(id.clone()),
                    ..user.clone()
                },
                ..Default::default()
            },
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn realm(name: &str) -> RealmRepresentation {
        RealmRepresentation {
            realm: name.to_string(),
            enabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn deleting_a_realm_cascades() {
        let iap = MemoryIdentityProvider::new();
        iap.create_realm(&realm("acme")).await.unwrap();
        iap.create_group("acme", &GroupRepresentation::new("main", "")).await.unwrap();
        let client = ClientRepresentation {
            client_id: "main-backend".to_string(),
            ..Default::default()
        };
        iap.create_client("acme", &client).await.unwrap();

        iap.delete_realm("acme").await.unwrap();

        assert!(!iap.realm_exists("acme"));
        assert!(matches!(
            iap.find_client("acme", "main-backend").await,
            Err(IapError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_creates_conflict() {
        let iap = MemoryIdentityProvider::new();
        iap.create_realm(&realm("acme")).await.unwrap();

        assert!(matches!(iap.create_realm(&realm("acme")).await, Err(IapError::Conflict(_))));
        iap.create_group("acme", &GroupRepresentation::new("main", "")).await.unwrap();
        assert!(matches!(
            iap.create_group("acme", &GroupRepresentation::new("main", "")).await,
            Err(IapError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn injected_failures_are_recorded() {
        let iap = MemoryIdentityProvider::new();
        iap.fail_on("create_realm");

        assert!(matches!(
            iap.create_realm(&realm("acme")).await,
            Err(IapError::Status { status: 500, .. })
        ));
        assert_eq!(iap.calls(), vec!["create_realm".to_string()]);
        assert!(!iap.realm_exists("acme"));

        iap.clear_failures();
        iap.create_realm(&realm("acme")).await.unwrap();
        assert!(iap.realm_exists("acme"));
    }
}
