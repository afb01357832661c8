// Branch schema template: one isolated Postgres schema per branch holding the
// branch-local feature tables. Rendering is pure; execution lives in the store.

use crate::database::DatabaseManager;
use crate::provisioning::error::{ProvisionError, ProvisionResult};
use crate::provisioning::naming;

const SCHEMA_PLACEHOLDER: &str = "{{schema}}";

const BRANCH_SCHEMA_TEMPLATE: &str = r#"
CREATE SCHEMA {{schema}};

CREATE TABLE {{schema}}.branch_info (
    "id" UUID PRIMARY KEY,
    "tenant_domain" TEXT NOT NULL,
    "name" TEXT NOT NULL,
    "description" TEXT NOT NULL DEFAULT '',
    "created_at" TIMESTAMPTZ DEFAULT now() NOT NULL,
    "updated_at" TIMESTAMPTZ DEFAULT now() NOT NULL
);

CREATE TABLE {{schema}}.assets (
    "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    "name" TEXT NOT NULL,
    "description" TEXT NOT NULL DEFAULT '',
    "parent_id" UUID REFERENCES {{schema}}.assets ("id") ON DELETE SET NULL,
    "attributes" JSONB NOT NULL DEFAULT '{}',
    "created_at" TIMESTAMPTZ DEFAULT now() NOT NULL,
    "updated_at" TIMESTAMPTZ DEFAULT now() NOT NULL
);

CREATE TABLE {{schema}}.devices (
    "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    "asset_id" UUID REFERENCES {{schema}}.assets ("id") ON DELETE SET NULL,
    "name" TEXT NOT NULL,
    "description" TEXT NOT NULL DEFAULT '',
    "broker_username" TEXT UNIQUE,
    "broker_password_hash" TEXT,
    "created_at" TIMESTAMPTZ DEFAULT now() NOT NULL,
    "updated_at" TIMESTAMPTZ DEFAULT now() NOT NULL
);

CREATE TABLE {{schema}}.measures (
    "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    "device_id" UUID NOT NULL REFERENCES {{schema}}.devices ("id") ON DELETE CASCADE,
    "name" TEXT NOT NULL,
    "unit" TEXT,
    "value_type" TEXT NOT NULL DEFAULT 'number',
    "created_at" TIMESTAMPTZ DEFAULT now() NOT NULL,
    "updated_at" TIMESTAMPTZ DEFAULT now() NOT NULL,
    UNIQUE ("device_id", "name")
);

CREATE TABLE {{schema}}.dashboards (
    "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    "name" TEXT NOT NULL,
    "description" TEXT NOT NULL DEFAULT '',
    "created_at" TIMESTAMPTZ DEFAULT now() NOT NULL,
    "updated_at" TIMESTAMPTZ DEFAULT now() NOT NULL
);

CREATE TABLE {{schema}}.widgets (
    "id" UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    "dashboard_id" UUID NOT NULL REFERENCES {{schema}}.dashboards ("id") ON DELETE CASCADE,
    "kind" TEXT NOT NULL,
    "pos_x" INTEGER NOT NULL DEFAULT 0,
    "pos_y" INTEGER NOT NULL DEFAULT 0,
    "width" INTEGER NOT NULL DEFAULT 1,
    "height" INTEGER NOT NULL DEFAULT 1,
    "config" JSONB NOT NULL DEFAULT '{}',
    "created_at" TIMESTAMPTZ DEFAULT now() NOT NULL,
    "updated_at" TIMESTAMPTZ DEFAULT now() NOT NULL
);
"#;

/// A rendered branch schema: validated name plus the script that creates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSchema {
    pub name: String,
    pub script: String,
}

impl BranchSchema {
    /// Quoted form of the schema name, safe to splice into SQL.
    pub fn quoted_name(&self) -> String {
        DatabaseManager::quote_identifier(&self.name)
    }
}

/// Render the creation script for an already-derived schema name.
pub fn render(schema_name: &str) -> ProvisionResult<BranchSchema> {
    if !naming::is_valid_schema_name(schema_name) {
        return Err(ProvisionError::InvalidSchemaName(schema_name.to_string()));
    }

    let quoted = DatabaseManager::quote_identifier(schema_name);
    Ok(BranchSchema {
        name: schema_name.to_string(),
        script: BRANCH_SCHEMA_TEMPLATE.replace(SCHEMA_PLACEHOLDER, &quoted),
    })
}

/// Derive the schema name for `(tenant, branch)` and render its script.
pub fn for_branch(tenant: &str, branch: &str) -> ProvisionResult<BranchSchema> {
    let name = naming::schema_name(tenant, branch)?;
    render(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_every_table_into_the_branch_schema() {
        let schema = for_branch("acme", "main").unwrap();

        assert_eq!(schema.name, "acme_main");
        assert!(schema.script.contains("CREATE SCHEMA \"acme_main\";"));
        for table in ["branch_info", "assets", "devices", "measures", "dashboards", "widgets"] {
            assert!(
                schema
                    .script
                    .contains(&format!("CREATE TABLE \"acme_main\".{} (", table)),
                "missing table {}",
                table
            );
        }
        assert!(!schema.script.contains(SCHEMA_PLACEHOLDER));
    }

    #[test]
    fn refuses_unsafe_schema_names() {
        assert!(matches!(
            render("acme\"; DROP SCHEMA public CASCADE; --"),
            Err(ProvisionError::InvalidSchemaName(_))
        ));
        assert!(render("Acme").is_err());
    }

    #[test]
    fn rendering_is_deterministic() {
        assert_eq!(for_branch("acme", "main").unwrap(), for_branch("acme", "main").unwrap());
        assert_ne!(
            for_branch("acme", "main").unwrap().script,
            for_branch("acme", "plant").unwrap().script
        );
    }
}
