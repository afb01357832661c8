use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Branch {
    pub id: Uuid,
    pub tenant_domain: String,
    /// Id of the IAP group backing this branch.
    pub group_id: String,
    pub name: String,
    pub description: String,
    /// Fixed at creation; renaming the branch does not move its schema.
    pub schema_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBranch {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchPatch {
    pub name: Option<String>,
    pub description: Option<String>,
}
