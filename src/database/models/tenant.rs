use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::models::branch::Branch;

/// Platform-wide tenant row. `domain` is the realm name and the natural key
/// every downstream operation uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub domain: String,
    pub name: String,
    pub description: String,
    pub realm_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTenant {
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub description: String,
    pub admin_email: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantPatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Result of a successful tenant creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedTenant {
    pub tenant: Tenant,
    pub default_branch: Branch,
    pub admin_branch: Branch,
    pub admin_user_id: String,
}
