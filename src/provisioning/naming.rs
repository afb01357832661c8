// Deterministic names shared by the identity provider objects and the branch schemas.
// Everything here is pure so the provisioners can validate input before any external call.

use sha2::{Digest, Sha256};

use crate::provisioning::error::{ProvisionError, ProvisionResult};

/// Role present in every branch; owns the wildcard permission.
pub const ADMIN_ROLE: &str = "admin";

/// Name of the reserved branch created alongside every tenant.
pub const ADMIN_BRANCH: &str = "admin";

/// Feature whose resource carries the wildcard permission.
pub const ADMIN_FEATURE: &str = "admin";

/// Resource type bound by the resource-based wildcard permission.
pub const ADMIN_RESOURCE_TYPE: &str = "admin";

/// Literals user-created branches may never use.
pub const RESERVED_BRANCH_NAMES: [&str; 3] = ["admin", "default", "undefined"];

/// Postgres truncates identifiers longer than this.
const MAX_IDENTIFIER_LEN: usize = 63;

pub fn frontend_client_id(branch: &str) -> String {
    format!("{}-frontend", branch)
}

pub fn backend_client_id(branch: &str) -> String {
    format!("{}-backend", branch)
}

pub fn policy_name(role: &str) -> String {
    format!("{}-policy", role)
}

pub fn resource_name(feature: &str) -> String {
    format!("{}-resource", feature)
}

/// Name of the scope-based permission granting `role` access to `resource`.
pub fn scope_permission_name(role: &str, resource: &str) -> String {
    format!("{}-{}-permission", role, resource)
}

/// Name of the resource-based permission owned by `role`.
pub fn resource_permission_name(role: &str) -> String {
    format!("{}-permission", role)
}

/// Tenant domains double as realm names and schema prefixes.
pub fn validate_domain(domain: &str) -> ProvisionResult<()> {
    if domain.len() < 2 || domain.len() > 40 {
        return Err(ProvisionError::validation(
            "domain",
            "must be between 2 and 40 characters",
        ));
    }
    if !domain.starts_with(|c: char| c.is_ascii_lowercase()) {
        return Err(ProvisionError::validation(
            "domain",
            "must start with a lowercase letter",
        ));
    }
    if !domain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(ProvisionError::validation(
            "domain",
            "can only contain lowercase letters, digits and hyphens",
        ));
    }
    Ok(())
}

/// Validate a user-supplied branch name, rejecting the reserved literals.
///
/// Branch names are lowercase so that two names can never fold onto the
/// same schema.
pub fn validate_branch_name(name: &str) -> ProvisionResult<()> {
    if RESERVED_BRANCH_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(ProvisionError::ReservedBranchName(name.to_string()));
    }
    validate_identifier("branch name", name)?;
    if name.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(ProvisionError::validation("branch name", "must be lowercase"));
    }
    Ok(())
}

/// Same charset rule as branch names; reserved-name checks live with the role manager.
pub fn validate_role_name(name: &str) -> ProvisionResult<()> {
    validate_identifier("role name", name)
}

fn validate_identifier(field: &'static str, name: &str) -> ProvisionResult<()> {
    if name.len() < 2 || name.len() > 50 {
        return Err(ProvisionError::validation(
            field,
            "must be between 2 and 50 characters",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ProvisionError::validation(
            field,
            "can only contain letters, numbers, hyphens, and underscores",
        ));
    }
    Ok(())
}

/// Derive the isolated schema name for a branch.
///
/// The name is `<tenant>_<branch>` lowercased with hyphens folded to
/// underscores. Names that would exceed the Postgres identifier limit are
/// shortened and suffixed with a hash of the full name so they stay
/// deterministic and distinct.
pub fn schema_name(tenant: &str, branch: &str) -> ProvisionResult<String> {
    let raw = format!("{}_{}", tenant, branch).to_ascii_lowercase().replace('-', "_");

    let name = if raw.len() > MAX_IDENTIFIER_LEN {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        format!("{}_{}", &raw[..MAX_IDENTIFIER_LEN - 17], &hash[..16])
    } else {
        raw
    };

    if is_valid_schema_name(&name) {
        Ok(name)
    } else {
        Err(ProvisionError::InvalidSchemaName(name))
    }
}

/// Strict charset check applied before a schema name is templated into DDL.
pub fn is_valid_schema_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_IDENTIFIER_LEN
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.starts_with("pg_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_object_names() {
        assert_eq!(frontend_client_id("main"), "main-frontend");
        assert_eq!(backend_client_id("main"), "main-backend");
        assert_eq!(policy_name("operator"), "operator-policy");
        assert_eq!(resource_name("asset"), "asset-resource");
        assert_eq!(
            scope_permission_name("operator", "asset-resource"),
            "operator-asset-resource-permission"
        );
        assert_eq!(resource_permission_name(ADMIN_ROLE), "admin-permission");
    }

    #[test]
    fn rejects_reserved_branch_names() {
        for name in ["admin", "default", "undefined", "Admin"] {
            assert!(matches!(
                validate_branch_name(name),
                Err(ProvisionError::ReservedBranchName(_))
            ));
        }
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("plant_7-north").is_ok());
        assert!(validate_branch_name("main; DROP").is_err());
        assert!(validate_branch_name("m").is_err());
    }

    #[test]
    fn branch_names_differing_only_in_case_are_rejected() {
        let err = validate_branch_name("Main").unwrap_err();
        assert!(err.is_validation());
        assert_eq!(
            schema_name("acme", "Main").unwrap(),
            schema_name("acme", "main").unwrap()
        );
    }

    #[test]
    fn validates_domains() {
        assert!(validate_domain("acme").is_ok());
        assert!(validate_domain("acme-2").is_ok());
        assert!(validate_domain("Acme").is_err());
        assert!(validate_domain("9acme").is_err());
        assert!(validate_domain("acme_corp").is_err());
        assert!(validate_domain("a").is_err());
    }

    #[test]
    fn schema_names_are_deterministic_and_safe() {
        assert_eq!(schema_name("acme", "main").unwrap(), "acme_main");
        assert_eq!(schema_name("acme-co", "Plant-7").unwrap(), "acme_co_plant_7");

        let long_branch = "b".repeat(50);
        let first = schema_name("acme-industrial-group", &long_branch).unwrap();
        let second = schema_name("acme-industrial-group", &long_branch).unwrap();
        assert_eq!(first, second);
        assert!(first.len() <= 63);
        assert!(is_valid_schema_name(&first));
    }

    #[test]
    fn schema_charset_is_strict() {
        assert!(is_valid_schema_name("acme_main"));
        assert!(!is_valid_schema_name("acme-main"));
        assert!(!is_valid_schema_name("acme\"; drop schema public; --"));
        assert!(!is_valid_schema_name("pg_catalog"));
        assert!(!is_valid_schema_name("1acme"));
        assert!(!is_valid_schema_name(""));
    }
}
