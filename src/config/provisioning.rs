//! Static provisioning input: the role list, the resource catalogue, the
//! role x resource permission matrix, OAuth client templates and the
//! compensation policy.
//!
//! The document is YAML. It is normalised (the reserved admin resource is
//! always present) and validated once at load time; the provisioners treat
//! the result as immutable.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::provisioning::naming;

const EMBEDDED_DEFAULT: &str = include_str!("default_provisioning.yaml");

const TENANT_PLACEHOLDER: &str = "{tenant}";
const BRANCH_PLACEHOLDER: &str = "{branch}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read provisioning config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse provisioning config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid provisioning config: {0}")]
    Invalid(String),
}

/// role name -> resource name -> granted scopes
pub type PermissionMatrix = BTreeMap<String, BTreeMap<String, Vec<String>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleTemplate {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// One protected feature. Yields the `<name>-resource` authorization resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTemplate {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Allowed scopes; every configured scope when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
}

impl ResourceTemplate {
    pub fn resource_name(&self) -> String {
        naming::resource_name(&self.name)
    }

    pub fn resource_type(&self) -> String {
        self.resource_type.clone().unwrap_or_else(|| self.name.clone())
    }

    pub fn allowed_scopes(&self, all: &[String]) -> Vec<String> {
        self.scopes.clone().unwrap_or_else(|| all.to_vec())
    }
}

/// OAuth client registration template. `{tenant}` and `{branch}` are replaced
/// in every URL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientTemplate {
    #[serde(default)]
    pub root_url: Option<String>,
    #[serde(default)]
    pub admin_url: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub web_origins: Vec<String>,
}

impl ClientTemplate {
    pub fn render(&self, tenant: &str, branch: &str) -> ClientTemplate {
        let fill = |value: &String| {
            value
                .replace(TENANT_PLACEHOLDER, tenant)
                .replace(BRANCH_PLACEHOLDER, branch)
        };
        ClientTemplate {
            root_url: self.root_url.as_ref().map(fill),
            admin_url: self.admin_url.as_ref().map(fill),
            redirect_uris: self.redirect_uris.iter().map(fill).collect(),
            web_origins: self.web_origins.iter().map(fill).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationPolicy {
    /// Also undo OAuth clients of a failed branch and the branch schemas and
    /// rows of a failed tenant. Off by default: only the group (branch) and
    /// the realm (tenant) are compensated.
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Non-admin bootstrap roles. The admin role is implicit.
    #[serde(default)]
    pub roles: Vec<RoleTemplate>,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub resources: Vec<ResourceTemplate>,
    #[serde(default)]
    pub permissions: PermissionMatrix,
    #[serde(default)]
    pub frontend_client: ClientTemplate,
    #[serde(default)]
    pub backend_client: ClientTemplate,
    #[serde(default)]
    pub compensation: CompensationPolicy,
}

fn default_scopes() -> Vec<String> {
    ["view", "create", "update", "delete"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl ProvisioningConfig {
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        let mut config: ProvisioningConfig = serde_yaml::from_str(document)?;
        config.ensure_admin_resource();
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_yaml(&document)?;
        tracing::info!(
            "Loaded provisioning config from {} ({} roles, {} resources)",
            path.display(),
            config.roles.len(),
            config.resources.len()
        );
        Ok(config)
    }

    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_yaml(EMBEDDED_DEFAULT)
    }

    pub fn role_names(&self) -> Vec<String> {
        self.roles.iter().map(|role| role.name.clone()).collect()
    }

    pub fn role(&self, name: &str) -> Option<&RoleTemplate> {
        self.roles.iter().find(|role| role.name == name)
    }

    /// Bootstrap role names that standalone role creation must not reuse.
    pub fn is_reserved_role(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(naming::ADMIN_ROLE)
            || self.roles.iter().any(|role| role.name.eq_ignore_ascii_case(name))
    }

    pub fn resource(&self, resource_name: &str) -> Option<&ResourceTemplate> {
        self.resources
            .iter()
            .find(|resource| resource.resource_name() == resource_name)
    }

    /// The admin feature backs the resource-based wildcard permission, so it
    /// must exist with every scope and the reserved admin type.
    fn ensure_admin_resource(&mut self) {
        match self
            .resources
            .iter_mut()
            .find(|resource| resource.name == naming::ADMIN_FEATURE)
        {
            Some(admin) => {
                admin.resource_type = Some(naming::ADMIN_RESOURCE_TYPE.to_string());
                admin.scopes = None;
            }
            None => self.resources.push(ResourceTemplate {
                name: naming::ADMIN_FEATURE.to_string(),
                resource_type: Some(naming::ADMIN_RESOURCE_TYPE.to_string()),
                scopes: None,
            }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.scopes.is_empty() {
            return invalid("at least one scope is required".to_string());
        }
        let scopes: HashSet<&str> = self.scopes.iter().map(String::as_str).collect();
        if scopes.len() != self.scopes.len() {
            return invalid("duplicate scope names".to_string());
        }

        let mut role_names = HashSet::new();
        for role in &self.roles {
            if role.name.eq_ignore_ascii_case(naming::ADMIN_ROLE) {
                return invalid(format!("role \"{}\" is implicit and cannot be configured", role.name));
            }
            if naming::validate_role_name(&role.name).is_err() {
                return invalid(format!("role name \"{}\" is malformed", role.name));
            }
            if !role_names.insert(role.name.as_str()) {
                return invalid(format!("role \"{}\" is configured twice", role.name));
            }
        }

        let mut resource_names = HashSet::new();
        for resource in &self.resources {
            if !resource_names.insert(resource.name.as_str()) {
                return invalid(format!("resource \"{}\" is configured twice", resource.name));
            }
            for scope in resource.scopes.iter().flatten() {
                if !scopes.contains(scope.as_str()) {
                    return invalid(format!(
                        "resource \"{}\" allows unknown scope \"{}\"",
                        resource.name, scope
                    ));
                }
            }
        }

        for (role, grants) in &self.permissions {
            if role != naming::ADMIN_ROLE && !role_names.contains(role.as_str()) {
                return invalid(format!("permission matrix names unknown role \"{}\"", role));
            }
            for (resource_name, granted) in grants {
                let Some(resource) = self.resource(resource_name) else {
                    return invalid(format!(
                        "permission matrix names unknown resource \"{}\"",
                        resource_name
                    ));
                };
                if granted.is_empty() {
                    return invalid(format!("{} on {} grants no scopes", role, resource_name));
                }
                let allowed = resource.allowed_scopes(&self.scopes);
                if let Some(scope) = granted.iter().find(|scope| !allowed.contains(scope)) {
                    return invalid(format!(
                        "{} on {} grants scope \"{}\" the resource does not allow",
                        role, resource_name, scope
                    ));
                }
            }
        }

        Ok(())
    }
}
