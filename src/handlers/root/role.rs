use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::AppState;
use crate::iap::RoleRepresentation;
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// POST /api/root/tenant/:domain/branch/:id/role - role plus its dedicated policy
pub async fn role_create(
    State(state): State<AppState>,
    Path((domain, id)): Path<(String, Uuid)>,
    Json(request): Json<CreateRoleRequest>,
) -> ApiResult<RoleRepresentation> {
    let role = state
        .branches()
        .create_role(&domain, id, &request.name, &request.description)
        .await?;
    Ok(ApiResponse::created(role))
}

/// DELETE /api/root/tenant/:domain/branch/:id/role/:name
pub async fn role_delete(
    State(state): State<AppState>,
    Path((domain, id, name)): Path<(String, Uuid, String)>,
) -> ApiResult<()> {
    state.branches().delete_role(&domain, id, &name).await?;
    Ok(ApiResponse::<()>::no_content())
}

/// GET /api/root/tenant/:domain/branch/:id/user/:user_id/roles
pub async fn user_roles(
    State(state): State<AppState>,
    Path((domain, id, user_id)): Path<(String, Uuid, String)>,
) -> ApiResult<Vec<RoleRepresentation>> {
    Ok(ApiResponse::success(state.branches().user_roles(&domain, id, &user_id).await?))
}
