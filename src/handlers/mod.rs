// handlers/mod.rs - HTTP surface
//
// Thin axum handlers over the provisioners. Authentication of the /api/root
// tier belongs to the deployment in front of this service.

pub mod root;

use axum::{
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};
use sqlx::PgPool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::database::DatabaseManager;
use crate::provisioning::{BranchProvisioner, TenantProvisioner};

/// Shared per-process state. Provisioners are stateless per call; the pool
/// is only used for health reporting.
#[derive(Clone)]
pub struct AppState {
    pub tenants: TenantProvisioner,
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(tenants: TenantProvisioner, pool: Option<PgPool>) -> Self {
        Self { tenants, pool }
    }

    pub fn branches(&self) -> &BranchProvisioner {
        self.tenants.branches()
    }
}

pub fn app(state: AppState, request_logging: bool) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .merge(root_routes())
        .with_state(state)
        .layer(CorsLayer::permissive());

    if request_logging {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn root_routes() -> Router<AppState> {
    Router::new()
        .route("/api/root/tenant", post(root::tenant_create))
        .route(
            "/api/root/tenant/:domain",
            get(root::tenant_show).patch(root::tenant_update),
        )
        .route(
            "/api/root/tenant/:domain/branch",
            get(root::branch_list).post(root::branch_create),
        )
        .route(
            "/api/root/tenant/:domain/branch/:id",
            get(root::branch_show).patch(root::branch_update),
        )
        .route("/api/root/tenant/:domain/branch/:id/role", post(root::role_create))
        .route(
            "/api/root/tenant/:domain/branch/:id/role/:name",
            delete(root::role_delete),
        )
        .route(
            "/api/root/tenant/:domain/branch/:id/user/:user_id/roles",
            get(root::user_roles),
        )
}

async fn index() -> axum::response::Json<Value> {
    axum::response::Json(json!({
        "success": true,
        "data": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "health": "/health (public)",
                "root": "/api/root/tenant[/:domain[/branch[/:id[/role[/:name]]]]]",
            }
        }
    }))
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl axum::response::IntoResponse {
    let now = chrono::Utc::now();

    let database = match &state.pool {
        Some(pool) => DatabaseManager::health_check(pool).await.map(|_| "ok"),
        None => Ok("memory"),
    };

    match database {
        Ok(database) => (
            axum::http::StatusCode::OK,
            axum::response::Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": database
                }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            axum::response::Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": {
                    "status": "degraded",
                    "timestamp": now,
                    "database_error": e.to_string()
                }
            })),
        ),
    }
}
