mod common;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::Harness;
use tenant_provisioner::handlers::{app, AppState};

fn router(harness: &Harness) -> Router {
    app(AppState::new(harness.tenants.clone(), None), false)
}

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => request.body(Body::empty())?,
    };

    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, json))
}

fn acme_request() -> Value {
    json!({
        "name": "Acme Corp",
        "domain": "acme",
        "admin_email": "ops@acme.io",
        "default_branch": "main"
    })
}

#[tokio::test]
async fn health_reports_memory_store() -> Result<()> {
    let harness = Harness::new();
    let (status, body) = send(&router(&harness), Method::GET, "/health", None).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["database"], "memory");
    Ok(())
}

#[tokio::test]
async fn create_tenant_returns_envelope() -> Result<()> {
    let harness = Harness::new();
    let router = router(&harness);

    let (status, body) = send(&router, Method::POST, "/api/root/tenant", Some(acme_request())).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["tenant"]["domain"], "acme");
    assert_eq!(body["data"]["default_branch"]["name"], "main");
    assert_eq!(body["data"]["admin_branch"]["name"], "admin");

    let (status, body) = send(&router, Method::GET, "/api/root/tenant/acme", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Acme Corp");
    Ok(())
}

#[tokio::test]
async fn duplicate_tenant_is_conflict() -> Result<()> {
    let harness = Harness::new();
    let router = router(&harness);
    send(&router, Method::POST, "/api/root/tenant", Some(acme_request())).await?;

    let (status, body) = send(&router, Method::POST, "/api/root/tenant", Some(acme_request())).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    Ok(())
}

#[tokio::test]
async fn reserved_branch_is_bad_request() -> Result<()> {
    let harness = Harness::new();
    let router = router(&harness);
    send(&router, Method::POST, "/api/root/tenant", Some(acme_request())).await?;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/root/tenant/acme/branch",
        Some(json!({ "name": "undefined" })),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], true);
    assert_eq!(body["code"], "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn branch_lifecycle_over_http() -> Result<()> {
    let harness = Harness::new();
    let router = router(&harness);
    send(&router, Method::POST, "/api/root/tenant", Some(acme_request())).await?;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/root/tenant/acme/branch",
        Some(json!({ "name": "plant", "description": "Production plant" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_str().expect("branch id").to_string();

    let (status, body) = send(&router, Method::GET, "/api/root/tenant/acme/branch", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(3));

    let uri = format!("/api/root/tenant/acme/branch/{}", id);
    let (status, body) = send(&router, Method::PATCH, &uri, Some(json!({ "description": "Plant #1" }))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["description"], "Plant #1");

    let role_uri = format!("{}/role", uri);
    let (status, body) = send(&router, Method::POST, &role_uri, Some(json!({ "name": "auditor" }))).await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["name"], "auditor");

    let (status, _) = send(&router, Method::DELETE, &format!("{}/auditor", role_uri), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn unknown_tenant_is_not_found() -> Result<()> {
    let harness = Harness::new();
    let (status, body) = send(&router(&harness), Method::GET, "/api/root/tenant/globex", None).await?;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    Ok(())
}
