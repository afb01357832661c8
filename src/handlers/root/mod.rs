// handlers/root/mod.rs - /api/root tenant management
//
// Tenants, their branches and ad hoc branch roles.

pub mod branch; // /api/root/tenant/:domain/branch[/:id]
pub mod role; // /api/root/tenant/:domain/branch/:id/role[/:name]
pub mod tenant; // /api/root/tenant[/:domain]

pub use branch::{branch_create, branch_list, branch_show, branch_update};
pub use role::{role_create, role_delete, user_roles};
pub use tenant::{tenant_create, tenant_show, tenant_update};
