// Tenant and branch provisioning across the identity provider and the
// relational store. Pure helpers (naming, schema) sit next to the saga
// executor and the provisioners that drive the external calls.

pub mod branch;
pub mod error;
pub mod naming;
pub mod rbac;
pub mod registrar;
pub mod saga;
pub mod schema;
pub mod tenant;

pub use branch::BranchProvisioner;
pub use error::{ProvisionError, ProvisionResult};
pub use rbac::{RbacGraph, RbacGraphBuilder, RoleManager};
pub use registrar::{ClientKind, ClientRef, ClientRegistrar};
pub use saga::Saga;
pub use tenant::TenantProvisioner;
