// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::iap::IapError;
use crate::provisioning::ProvisionError;
use crate::store::StoreError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 502 Bad Gateway (identity provider failures)
    BadGateway(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
            ApiError::BadGateway(_) => 502,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::BadGateway(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ApiError::ValidationError { message, field_errors } => {
                let mut response = json!({
                    "error": true,
                    "message": message,
                    "code": "VALIDATION_ERROR"
                });

                if let Some(field_errors) = field_errors {
                    response["field_errors"] = json!(field_errors);
                }

                response
            }
            _ => {
                json!({
                    "error": true,
                    "message": self.message(),
                    "code": self.error_code()
                })
            }
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::BadGateway(_) => "BAD_GATEWAY",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(message: impl Into<String>, field_errors: Option<HashMap<String, String>>) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        ApiError::BadGateway(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

// The message keeps the failing step; the status comes from the root cause.
impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        let message = err.to_string();
        match err.root_cause() {
            ProvisionError::Validation { field, message: reason } => {
                let mut field_errors = HashMap::new();
                field_errors.insert(field.to_string(), reason.clone());
                ApiError::validation_error(message, Some(field_errors))
            }
            ProvisionError::ReservedBranchName(_)
            | ProvisionError::ReservedRoleName(_)
            | ProvisionError::InvalidSchemaName(_) => ApiError::bad_request(message),
            ProvisionError::NotFound(_) => ApiError::not_found(message),
            ProvisionError::Iap(IapError::Conflict(_)) => ApiError::conflict(message),
            ProvisionError::Iap(IapError::NotFound(_)) => ApiError::not_found(message),
            ProvisionError::Iap(IapError::Status { status, operation, .. }) => {
                // The provider's response body stays in the log
                tracing::error!("Identity provider failure: {}", message);
                let step = err.failed_step().unwrap_or(operation.as_str());
                ApiError::bad_gateway(format!("{} failed: identity provider returned {}", step, status))
            }
            ProvisionError::Iap(iap) => {
                tracing::error!("Identity provider failure: {}", iap);
                ApiError::bad_gateway(message)
            }
            ProvisionError::Store(StoreError::Conflict(_)) => ApiError::conflict(message),
            ProvisionError::Store(StoreError::NotFound(_)) => ApiError::not_found(message),
            ProvisionError::Store(StoreError::Unavailable(_)) => {
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            ProvisionError::Store(store) => {
                // Don't expose internal SQL errors to clients
                tracing::error!("Store error: {}", store);
                let step = err.failed_step().unwrap_or("request");
                ApiError::internal_server_error(format!("{} failed: database error", step))
            }
            ProvisionError::Step { .. } => ApiError::internal_server_error(message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ProvisionError::from(err).into()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
