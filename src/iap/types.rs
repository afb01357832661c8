// Wire representations of the IAP admin API (Keycloak JSON shapes).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealmRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub realm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, Vec<String>>,
}

impl GroupRepresentation {
    pub fn new(name: &str, description: &str) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert("description".to_string(), vec![description.to_string()]);
        Self {
            id: None,
            name: name.to_string(),
            attributes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub public_client: bool,
    #[serde(default)]
    pub standard_flow_enabled: bool,
    #[serde(default)]
    pub direct_access_grants_enabled: bool,
    #[serde(default)]
    pub service_accounts_enabled: bool,
    #[serde(default)]
    pub authorization_services_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_url: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub web_origins: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub client_role: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub email_verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRepresentation {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub scopes: Vec<ScopeRepresentation>,
    #[serde(default)]
    pub owner_managed_access: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Logic {
    #[default]
    Positive,
    Negative,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStrategy {
    #[default]
    Unanimous,
    Affirmative,
    Consensus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyRole {
    pub id: String,
    #[serde(default)]
    pub required: bool,
}

/// Role-based policy: a named set of roles with positive logic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default = "role_policy_type")]
    pub policy_type: String,
    #[serde(default)]
    pub logic: Logic,
    #[serde(default)]
    pub decision_strategy: DecisionStrategy,
    #[serde(default)]
    pub roles: Vec<PolicyRole>,
}

fn role_policy_type() -> String {
    "role".to_string()
}

impl PolicyRepresentation {
    /// Positive role policy over the given role ids.
    pub fn for_roles(name: impl Into<String>, role_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            policy_type: role_policy_type(),
            logic: Logic::Positive,
            decision_strategy: DecisionStrategy::Unanimous,
            roles: role_ids
                .into_iter()
                .map(|id| PolicyRole { id, required: false })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionKind {
    #[default]
    Scope,
    Resource,
}

impl PermissionKind {
    /// Sub-path of the permission endpoint for this kind.
    pub fn path(&self) -> &'static str {
        match self {
            PermissionKind::Scope => "scope",
            PermissionKind::Resource => "resource",
        }
    }
}

/// Scope-based permissions bind resource ids and scope ids; resource-based
/// permissions bind a resource type. Both reference policy ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRepresentation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: PermissionKind,
    #[serde(default)]
    pub logic: Logic,
    #[serde(default)]
    pub decision_strategy: DecisionStrategy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn policy_serializes_in_admin_api_shape() {
        let policy = PolicyRepresentation {
            name: "operator-policy".to_string(),
            policy_type: role_policy_type(),
            roles: vec![PolicyRole { id: "r-1".to_string(), required: false }],
            ..Default::default()
        };

        assert_eq!(
            serde_json::to_value(&policy).unwrap(),
            json!({
                "name": "operator-policy",
                "type": "role",
                "logic": "POSITIVE",
                "decisionStrategy": "UNANIMOUS",
                "roles": [{ "id": "r-1", "required": false }]
            })
        );
    }

    #[test]
    fn resource_id_uses_underscore_field() {
        let resource: ResourceRepresentation = serde_json::from_value(json!({
            "_id": "res-1",
            "name": "asset-resource",
            "type": "asset",
            "scopes": [{ "id": "s-1", "name": "view" }]
        }))
        .unwrap();

        assert_eq!(resource.id.as_deref(), Some("res-1"));
        assert_eq!(resource.resource_type.as_deref(), Some("asset"));
        assert_eq!(resource.scopes[0].name, "view");
    }

    #[test]
    fn resource_permission_carries_type_not_resources() {
        let permission = PermissionRepresentation {
            name: "admin-permission".to_string(),
            kind: PermissionKind::Resource,
            resource_type: Some("admin".to_string()),
            policies: vec!["p-1".to_string()],
            ..Default::default()
        };
        let value = serde_json::to_value(&permission).unwrap();

        assert_eq!(value["type"], "resource");
        assert_eq!(value["resourceType"], "admin");
        assert!(value.get("resources").is_none());
        assert_eq!(PermissionKind::Resource.path(), "resource");
    }
}
