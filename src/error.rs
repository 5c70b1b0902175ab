// HTTP API Error Types
use axum::extract::rejection::JsonRejection;
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::database::ConnectionError;
use crate::directory::DirectoryError;
use crate::services::{FailureClass, OnboardingError};
use crate::types::InvalidTenantId;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    InvalidJson(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::InvalidJson(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        })
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
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

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }

    /// Absent, not-ready and unresolvable tenants all look the same to clients
    pub fn tenant_not_found() -> Self {
        ApiError::not_found("Tenant not found")
    }
}

// Convert other error types to ApiError
impl From<ConnectionError> for ApiError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::TenantNotReady(tenant_id) => {
                tracing::debug!("Tenant {} is not routable", tenant_id);
                ApiError::tenant_not_found()
            }
            ConnectionError::Credential { tenant_id, source } => {
                // Tampered or mis-keyed secret, needs an operator
                tracing::error!("Credential for tenant {} failed to decrypt: {}", tenant_id, source);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            other => {
                tracing::error!("Tenant connection error: {:?}", other);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<OnboardingError> for ApiError {
    fn from(err: OnboardingError) -> Self {
        if let OnboardingError::InvalidRequest(msg) = &err {
            return ApiError::bad_request(msg.clone());
        }

        match err.class() {
            FailureClass::PickAnotherId => {
                ApiError::conflict("That tenant id is already taken, please pick another")
            }
            FailureClass::RetryLater => {
                tracing::warn!("Onboarding failed, retryable: {:?}", err);
                ApiError::service_unavailable("We could not set up your workspace right now, please try again later")
            }
            FailureClass::ContactSupport => {
                tracing::error!("Onboarding failed: {:?}", err);
                ApiError::internal_server_error("We could not set up your workspace, please contact support")
            }
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound(_) => ApiError::tenant_not_found(),
            DirectoryError::DuplicateTenantId(_) => ApiError::conflict("Tenant already exists"),
            DirectoryError::InvalidStateTransition { .. } => {
                ApiError::conflict("Tenant is not in a state that allows this")
            }
            DirectoryError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DirectoryError::CorruptRecord(msg) => {
                tracing::error!("Corrupt tenant record: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<InvalidTenantId> for ApiError {
    fn from(err: InvalidTenantId) -> Self {
        ApiError::bad_request(format!("Invalid tenant id: {}", err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_json(rejection.body_text())
    }
}

// Standard error trait implementations
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
