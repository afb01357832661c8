use async_trait::async_trait;
use reqwest::{header::LOCATION, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use url::Url;

use crate::config::IapConfig;
use crate::iap::token::{ClientCredentials, TokenCache};
use crate::iap::{
    AuthorizationApi, ClientApi, ClientRepresentation, GroupApi, GroupRepresentation, IapError,
    PermissionRepresentation, PolicyRepresentation, RealmApi, RealmRepresentation,
    ResourceRepresentation, RoleApi, RoleRepresentation, ScopeRepresentation, UserApi,
    UserRepresentation,
};

/// Admin API client for a Keycloak-compatible identity provider.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    base_url: Url,
    tokens: TokenCache,
}

impl HttpIdentityProvider {
    pub fn new(http: reqwest::Client, base_url: Url, tokens: TokenCache) -> Self {
        Self {
            http,
            base_url,
            tokens,
        }
    }

    /// Build a client authenticating with the configured service account.
    pub fn from_config(config: &IapConfig) -> Result<Self, IapError> {
        let base_url =
            Url::parse(&config.base_url).map_err(|_| IapError::InvalidUrl(config.base_url.clone()))?;
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.request_timeout_secs))
            .build()?;
        let source = ClientCredentials::new(
            http.clone(),
            &base_url,
            &config.admin_realm,
            config.client_id.clone(),
            config.client_secret.clone(),
        )?;
        let tokens = TokenCache::new(
            Arc::new(source),
            chrono::Duration::seconds(config.token_refresh_margin_secs as i64),
        );
        Ok(Self::new(http, base_url, tokens))
    }

    /// `<base>/admin/realms/<segments...>`, each segment percent-encoded.
    fn admin_url(&self, segments: &[&str]) -> Result<Url, IapError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IapError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["admin", "realms"])
            .extend(segments);
        Ok(url)
    }

    fn authz_url(&self, realm: &str, client: &str, rest: &[&str]) -> Result<Url, IapError> {
        let mut segments = vec![realm, "clients", client, "authz", "resource-server"];
        segments.extend_from_slice(rest);
        self.admin_url(&segments)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, IapError> {
        let token = self.tokens.token().await?;
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn execute(&self, request: RequestBuilder, operation: &str) -> Result<Response, IapError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::debug!("IAP {} returned {}: {}", operation, status, body);
        Err(match status {
            StatusCode::CONFLICT => IapError::Conflict(operation.to_string()),
            StatusCode::NOT_FOUND => IapError::NotFound(operation.to_string()),
            _ => IapError::Status {
                status: status.as_u16(),
                operation: operation.to_string(),
                body,
            },
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, operation: &str) -> Result<T, IapError> {
        let request = self.request(Method::GET, url).await?;
        Ok(self.execute(request, operation).await?.json().await?)
    }

    /// Exact-name lookup over a search endpoint (`?name=` matches by prefix).
    async fn find_named<T: DeserializeOwned + Named>(
        &self,
        mut url: Url,
        query: &str,
        name: &str,
        operation: &str,
    ) -> Result<Option<T>, IapError> {
        url.query_pairs_mut().append_pair(query, name);
        let found: Vec<T> = self.get_json(url, operation).await?;
        Ok(found.into_iter().find(|item| item.lookup_name() == name))
    }

    async fn send_no_content(&self, method: Method, url: Url, operation: &str) -> Result<(), IapError> {
        let request = self.request(method, url).await?;
        self.execute(request, operation).await?;
        Ok(())
    }
}

/// Objects the admin API can search for by name.
trait Named {
    fn lookup_name(&self) -> &str;
}

impl Named for ClientRepresentation {
    fn lookup_name(&self) -> &str {
        &self.client_id
    }
}

impl Named for ScopeRepresentation {
    fn lookup_name(&self) -> &str {
        &self.name
    }
}

impl Named for ResourceRepresentation {
    fn lookup_name(&self) -> &str {
        &self.name
    }
}

impl Named for PolicyRepresentation {
    fn lookup_name(&self) -> &str {
        &self.name
    }
}

impl Named for PermissionRepresentation {
    fn lookup_name(&self) -> &str {
        &self.name
    }
}

/// The id of a created object is the last segment of its `Location` header.
fn created_id(response: &Response, operation: &str) -> Result<String, IapError> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|location| location.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| IapError::MissingId(operation.to_string()))
}

#[async_trait]
impl RealmApi for HttpIdentityProvider {
    async fn create_realm(&self, realm: &RealmRepresentation) -> Result<(), IapError> {
        let operation = format!("create realm {}", realm.realm);
        let request = self.request(Method::POST, self.admin_url(&[])?).await?.json(realm);
        self.execute(request, &operation).await?;
        Ok(())
    }

    async fn get_realm(&self, realm: &str) -> Result<RealmRepresentation, IapError> {
        self.get_json(self.admin_url(&[realm])?, &format!("get realm {}", realm)).await
    }

    async fn update_realm(&self, realm: &str, update: &RealmRepresentation) -> Result<(), IapError> {
        let request = self.request(Method::PUT, self.admin_url(&[realm])?).await?.json(update);
        self.execute(request, &format!("update realm {}", realm)).await?;
        Ok(())
    }

    async fn delete_realm(&self, realm: &str) -> Result<(), IapError> {
        self.send_no_content(Method::DELETE, self.admin_url(&[realm])?, &format!("delete realm {}", realm))
            .await
    }

    async fn refresh_credentials(&self) -> Result<(), IapError> {
        self.tokens.invalidate().await;
        self.tokens.token().await.map(|_| ())
    }
}

#[async_trait]
impl GroupApi for HttpIdentityProvider {
    async fn create_group(&self, realm: &str, group: &GroupRepresentation) -> Result<String, IapError> {
        let operation = format!("create group {}", group.name);
        let request = self
            .request(Method::POST, self.admin_url(&[realm, "groups"])?)
            .await?
            .json(group);
        let response = self.execute(request, &operation).await?;
        created_id(&response, &operation)
    }

    async fn get_group(&self, realm: &str, group_id: &str) -> Result<GroupRepresentation, IapError> {
        self.get_json(self.admin_url(&[realm, "groups", group_id])?, &format!("get group {}", group_id))
            .await
    }

    async fn update_group(&self, realm: &str, group_id: &str, group: &GroupRepresentation) -> Result<(), IapError> {
        let request = self
            .request(Method::PUT, self.admin_url(&[realm, "groups", group_id])?)
            .await?
            .json(group);
        self.execute(request, &format!("update group {}", group_id)).await?;
        Ok(())
    }

    async fn delete_group(&self, realm: &str, group_id: &str) -> Result<(), IapError> {
        self.send_no_content(
            Method::DELETE,
            self.admin_url(&[realm, "groups", group_id])?,
            &format!("delete group {}", group_id),
        )
        .await
    }

    async fn add_group_member(&self, realm: &str, group_id: &str, user_id: &str) -> Result<(), IapError> {
        self.send_no_content(
            Method::PUT,
            self.admin_url(&[realm, "users", user_id, "groups", group_id])?,
            &format!("add user {} to group {}", user_id, group_id),
        )
        .await
    }

    async fn remove_group_member(&self, realm: &str, group_id: &str, user_id: &str) -> Result<(), IapError> {
        self.send_no_content(
            Method::DELETE,
            self.admin_url(&[realm, "users", user_id, "groups", group_id])?,
            &format!("remove user {} from group {}", user_id, group_id),
        )
        .await
    }
}

#[async_trait]
impl ClientApi for HttpIdentityProvider {
    async fn create_client(&self, realm: &str, client: &ClientRepresentation) -> Result<String, IapError> {
        let operation = format!("create client {}", client.client_id);
        let request = self
            .request(Method::POST, self.admin_url(&[realm, "clients"])?)
            .await?
            .json(client);
        let response = self.execute(request, &operation).await?;
        created_id(&response, &operation)
    }

    async fn find_client(&self, realm: &str, client_id: &str) -> Result<Option<ClientRepresentation>, IapError> {
        self.find_named(
            self.admin_url(&[realm, "clients"])?,
            "clientId",
            client_id,
            &format!("find client {}", client_id),
        )
        .await
    }

    async fn update_client(&self, realm: &str, id: &str, client: &ClientRepresentation) -> Result<(), IapError> {
        let request = self
            .request(Method::PUT, self.admin_url(&[realm, "clients", id])?)
            .await?
            .json(client);
        self.execute(request, &format!("update client {}", client.client_id)).await?;
        Ok(())
    }

    async fn delete_client(&self, realm: &str, id: &str) -> Result<(), IapError> {
        self.send_no_content(
            Method::DELETE,
            self.admin_url(&[realm, "clients", id])?,
            &format!("delete client {}", id),
        )
        .await
    }
}

#[async_trait]
impl RoleApi for HttpIdentityProvider {
    async fn create_client_role(&self, realm: &str, client: &str, role: &RoleRepresentation) -> Result<(), IapError> {
        let request = self
            .request(Method::POST, self.admin_url(&[realm, "clients", client, "roles"])?)
            .await?
            .json(role);
        self.execute(request, &format!("create role {}", role.name)).await?;
        Ok(())
    }

    async fn get_client_role(&self, realm: &str, client: &str, name: &str) -> Result<RoleRepresentation, IapError> {
        self.get_json(
            self.admin_url(&[realm, "clients", client, "roles", name])?,
            &format!("get role {}", name),
        )
        .await
    }

    async fn delete_client_role(&self, realm: &str, client: &str, name: &str) -> Result<(), IapError> {
        self.send_no_content(
            Method::DELETE,
            self.admin_url(&[realm, "clients", client, "roles", name])?,
            &format!("delete role {}", name),
        )
        .await
    }

    async fn user_client_roles(&self, realm: &str, user_id: &str, client: &str) -> Result<Vec<RoleRepresentation>, IapError> {
        self.get_json(
            self.admin_url(&[realm, "users", user_id, "role-mappings", "clients", client])?,
            &format!("get roles of user {}", user_id),
        )
        .await
    }

    async fn assign_client_roles(
        &self,
        realm: &str,
        user_id: &str,
        client: &str,
        roles: &[RoleRepresentation],
    ) -> Result<(), IapError> {
        let request = self
            .request(
                Method::POST,
                self.admin_url(&[realm, "users", user_id, "role-mappings", "clients", client])?,
            )
            .await?
            .json(roles);
        self.execute(request, &format!("assign roles to user {}", user_id)).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthorizationApi for HttpIdentityProvider {
    async fn find_scope(&self, realm: &str, client: &str, name: &str) -> Result<Option<ScopeRepresentation>, IapError> {
        self.find_named(
            self.authz_url(realm, client, &["scope"])?,
            "name",
            name,
            &format!("find scope {}", name),
        )
        .await
    }

    async fn create_scope(&self, realm: &str, client: &str, scope: &ScopeRepresentation) -> Result<ScopeRepresentation, IapError> {
        let request = self
            .request(Method::POST, self.authz_url(realm, client, &["scope"])?)
            .await?
            .json(scope);
        Ok(self
            .execute(request, &format!("create scope {}", scope.name))
            .await?
            .json()
            .await?)
    }

    async fn find_resource(&self, realm: &str, client: &str, name: &str) -> Result<Option<ResourceRepresentation>, IapError> {
        self.find_named(
            self.authz_url(realm, client, &["resource"])?,
            "name",
            name,
            &format!("find resource {}", name),
        )
        .await
    }

    async fn create_resource(
        &self,
        realm: &str,
        client: &str,
        resource: &ResourceRepresentation,
    ) -> Result<ResourceRepresentation, IapError> {
        let request = self
            .request(Method::POST, self.authz_url(realm, client, &["resource"])?)
            .await?
            .json(resource);
        Ok(self
            .execute(request, &format!("create resource {}", resource.name))
            .await?
            .json()
            .await?)
    }

    async fn find_policy(&self, realm: &str, client: &str, name: &str) -> Result<Option<PolicyRepresentation>, IapError> {
        self.find_named(
            self.authz_url(realm, client, &["policy"])?,
            "name",
            name,
            &format!("find policy {}", name),
        )
        .await
    }

    async fn create_role_policy(
        &self,
        realm: &str,
        client: &str,
        policy: &PolicyRepresentation,
    ) -> Result<PolicyRepresentation, IapError> {
        let request = self
            .request(Method::POST, self.authz_url(realm, client, &["policy", "role"])?)
            .await?
            .json(policy);
        Ok(self
            .execute(request, &format!("create policy {}", policy.name))
            .await?
            .json()
            .await?)
    }

    async fn delete_policy(&self, realm: &str, client: &str, policy_id: &str) -> Result<(), IapError> {
        self.send_no_content(
            Method::DELETE,
            self.authz_url(realm, client, &["policy", policy_id])?,
            &format!("delete policy {}", policy_id),
        )
        .await
    }

    async fn find_permission(&self, realm: &str, client: &str, name: &str) -> Result<Option<PermissionRepresentation>, IapError> {
        self.find_named(
            self.authz_url(realm, client, &["permission"])?,
            "name",
            name,
            &format!("find permission {}", name),
        )
        .await
    }

    async fn create_permission(
        &self,
        realm: &str,
        client: &str,
        permission: &PermissionRepresentation,
    ) -> Result<PermissionRepresentation, IapError> {
        let url = self.authz_url(realm, client, &["permission", permission.kind.path()])?;
        let request = self.request(Method::POST, url).await?.json(permission);
        Ok(self
            .execute(request, &format!("create permission {}", permission.name))
            .await?
            .json()
            .await?)
    }
}

#[async_trait]
impl UserApi for HttpIdentityProvider {
    async fn create_user(&self, realm: &str, user: &UserRepresentation) -> Result<String, IapError> {
        let operation = format!("create user {}", user.username);
        let request = self
            .request(Method::POST, self.admin_url(&[realm, "users"])?)
            .await?
            .json(user);
        let response = self.execute(request, &operation).await?;
        created_id(&response, &operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iap::token::{AccessToken, TokenSource};

    struct StaticToken;

    #[async_trait]
    impl TokenSource for StaticToken {
        async fn fetch_token(&self) -> Result<AccessToken, IapError> {
            Ok(AccessToken {
                value: "static".to_string(),
                expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        }
    }

    fn provider(base: &str) -> HttpIdentityProvider {
        HttpIdentityProvider::new(
            reqwest::Client::new(),
            Url::parse(base).unwrap(),
            TokenCache::new(Arc::new(StaticToken), chrono::Duration::seconds(10)),
        )
    }

    #[test]
    fn builds_admin_urls_with_encoded_segments() {
        let iap = provider("https://iam.example.com/auth/");

        assert_eq!(
            iap.admin_url(&["acme", "groups"]).unwrap().as_str(),
            "https://iam.example.com/auth/admin/realms/acme/groups"
        );
        assert_eq!(
            iap.admin_url(&["acme", "clients", "a/b"]).unwrap().as_str(),
            "https://iam.example.com/auth/admin/realms/acme/clients/a%2Fb"
        );
    }

    #[test]
    fn builds_authorization_urls() {
        let iap = provider("https://iam.example.com");

        assert_eq!(
            iap.authz_url("acme", "c-1", &["permission", "scope"]).unwrap().as_str(),
            "https://iam.example.com/admin/realms/acme/clients/c-1/authz/resource-server/permission/scope"
        );
    }
}
