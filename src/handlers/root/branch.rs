use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::database::{Branch, BranchPatch, NewBranch};
use crate::handlers::AppState;
use crate::middleware::{ApiResponse, ApiResult};

/// GET /api/root/tenant/:domain/branch
pub async fn branch_list(State(state): State<AppState>, Path(domain): Path<String>) -> ApiResult<Vec<Branch>> {
    Ok(ApiResponse::success(state.branches().list_branches(&domain).await?))
}

/// POST /api/root/tenant/:domain/branch
///
/// Reserved names (`admin`, `default`, `undefined`) are rejected with 400
/// before anything is created.
pub async fn branch_create(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    Json(request): Json<NewBranch>,
) -> ApiResult<Branch> {
    let branch = state.branches().create_branch(&domain, &request).await?;
    Ok(ApiResponse::created(branch))
}

/// GET /api/root/tenant/:domain/branch/:id
pub async fn branch_show(
    State(state): State<AppState>,
    Path((domain, id)): Path<(String, Uuid)>,
) -> ApiResult<Branch> {
    Ok(ApiResponse::success(state.branches().get_branch(&domain, id).await?))
}

/// PATCH /api/root/tenant/:domain/branch/:id
pub async fn branch_update(
    State(state): State<AppState>,
    Path((domain, id)): Path<(String, Uuid)>,
    Json(patch): Json<BranchPatch>,
) -> ApiResult<Branch> {
    Ok(ApiResponse::success(state.branches().update_branch(&domain, id, &patch).await?))
}
