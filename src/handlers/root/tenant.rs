use axum::{
    extract::{Path, State},
    Json,
};

use crate::database::{NewTenant, ProvisionedTenant, Tenant, TenantPatch};
use crate::handlers::AppState;
use crate::middleware::{ApiResponse, ApiResult};

/// POST /api/root/tenant - provision realm, default and admin branches, admin user
///
/// ```json
/// {
///   "name": "Acme Corp",
///   "domain": "acme",
///   "description": "optional",
///   "admin_email": "ops@acme.io",
///   "default_branch": "main"
/// }
/// ```
pub async fn tenant_create(
    State(state): State<AppState>,
    Json(request): Json<NewTenant>,
) -> ApiResult<ProvisionedTenant> {
    let provisioned = state.tenants.create_tenant(&request).await?;
    Ok(ApiResponse::created(provisioned))
}

/// GET /api/root/tenant/:domain
pub async fn tenant_show(State(state): State<AppState>, Path(domain): Path<String>) -> ApiResult<Tenant> {
    Ok(ApiResponse::success(state.tenants.get_tenant(&domain).await?))
}

/// PATCH /api/root/tenant/:domain - display name and description only
pub async fn tenant_update(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(patch): Json<TenantPatch>,
) -> ApiResult<Tenant> {
    Ok(ApiResponse::success(state.tenants.update_tenant(&domain, &patch).await?))
}
