mod common;

use anyhow::Result;
use common::Harness;
use tenant_provisioner::provisioning::ProvisionError;

#[tokio::test]
async fn ad_hoc_role_gets_its_own_policy() -> Result<()> {
    let harness = Harness::new();
    let provisioned = harness.seed_acme().await?;
    let main = provisioned.default_branch.id;

    let role = harness
        .branches()
        .create_role("acme", main, "auditor", "Reads everything")
        .await?;

    assert_eq!(role.name, "auditor");
    assert!(role.client_role);

    let realm = harness.realm("acme");
    let backend = realm.client_by_client_id("main-backend").unwrap();
    let policy = backend
        .policies
        .iter()
        .find(|p| p.name == "auditor-policy")
        .expect("auditor policy");
    assert_eq!(policy.roles.len(), 1);
    assert_eq!(Some(&policy.roles[0].id), role.id.as_ref());
    Ok(())
}

#[tokio::test]
async fn bootstrap_role_names_are_reserved() -> Result<()> {
    let harness = Harness::new();
    let provisioned = harness.seed_acme().await?;
    let main = provisioned.default_branch.id;

    for name in ["admin", "operator", "Operator"] {
        let err = harness
            .branches()
            .create_role("acme", main, name, "")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ReservedRoleName(_)), "{} accepted", name);

        let err = harness.branches().delete_role("acme", main, name).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ReservedRoleName(_)));
    }

    assert!(harness.iap.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_role_conflicts() -> Result<()> {
    let harness = Harness::new();
    let provisioned = harness.seed_acme().await?;
    let main = provisioned.default_branch.id;

    harness.branches().create_role("acme", main, "auditor", "").await?;
    let err = harness
        .branches()
        .create_role("acme", main, "auditor", "")
        .await
        .unwrap_err();

    assert_eq!(err.failed_step(), Some("create role auditor"));
    Ok(())
}

#[tokio::test]
async fn delete_role_removes_policy_then_role() -> Result<()> {
    let harness = Harness::new();
    let provisioned = harness.seed_acme().await?;
    let main = provisioned.default_branch.id;
    harness.branches().create_role("acme", main, "auditor", "").await?;
    harness.iap.clear_calls();

    harness.branches().delete_role("acme", main, "auditor").await?;

    let calls = harness.iap.calls();
    let policy = calls.iter().position(|c| c == "delete_policy").expect("policy deleted");
    let role = calls.iter().position(|c| c == "delete_client_role").expect("role deleted");
    assert!(policy < role);

    let realm = harness.realm("acme");
    let backend = realm.client_by_client_id("main-backend").unwrap();
    assert!(!backend.roles.contains_key("auditor"));
    assert!(backend.policies.iter().all(|p| p.name != "auditor-policy"));
    Ok(())
}

#[tokio::test]
async fn admin_user_holds_admin_role_on_default_branch() -> Result<()> {
    let harness = Harness::new();
    let provisioned = harness.seed_acme().await?;

    let roles = harness
        .branches()
        .user_roles("acme", provisioned.default_branch.id, &provisioned.admin_user_id)
        .await?;
    let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["admin"]);

    let on_admin_branch = harness
        .branches()
        .user_roles("acme", provisioned.admin_branch.id, &provisioned.admin_user_id)
        .await?;
    assert!(on_admin_branch.is_empty());
    Ok(())
}

#[tokio::test]
async fn policy_failure_removes_the_new_role() -> Result<()> {
    let harness = Harness::new();
    let provisioned = harness.seed_acme().await?;
    let main = provisioned.default_branch.id;
    harness.iap.fail_on("create_role_policy");

    let err = harness
        .branches()
        .create_role("acme", main, "auditor", "")
        .await
        .unwrap_err();
    assert_eq!(err.failed_step(), Some("create policy for role auditor"));

    let realm = harness.realm("acme");
    let backend = realm.client_by_client_id("main-backend").unwrap();
    assert!(!backend.roles.contains_key("auditor"));
    assert!(backend.policies.iter().all(|p| p.name != "auditor-policy"));

    harness.iap.clear_failures();
    let role = harness
        .branches()
        .create_role("acme", main, "auditor", "")
        .await?;
    assert_eq!(role.name, "auditor");
    Ok(())
}
