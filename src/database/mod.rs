pub mod manager;
pub mod models;

pub use manager::DatabaseManager;
pub use models::branch::{Branch, BranchPatch, NewBranch};
pub use models::tenant::{NewTenant, ProvisionedTenant, Tenant, TenantPatch};
