//! Application-wide error taxonomy and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

/// Unified error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: String,
    pub trace_id: String,
}

/// Application error. Every fallible operation in the core resolves to one of
/// these kinds before it crosses the worker or HTTP boundary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Request validation failed")]
    Validation(ValidationErrors),

    #[error("Invalid field value: {field}")]
    InvalidField { field: String, message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("Library already exists for this platform user")]
    LibraryAlreadyExists,

    #[error("Sync already in progress")]
    SyncAlreadyInProgress { operation_id: Option<Uuid> },

    #[error("Resource conflict: {message}")]
    Conflict { message: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication token required")]
    TokenRequired,

    #[error("Authentication token invalid or expired")]
    TokenInvalid,

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<u64> },

    #[error("Daily request cap exceeded for {platform}")]
    RateExceededDaily { platform: String },

    #[error("External service error: {service}")]
    External { service: String, message: String },

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Queue backend error: {0}")]
    QueueBackend(String),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal server error")]
    Internal { message: Option<String> },
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal {
            message: Some(message.into()),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        AppError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidField { .. } => StatusCode::BAD_REQUEST,

            AppError::InvalidCredentials | AppError::TokenRequired | AppError::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }

            AppError::NotFound { .. } => StatusCode::NOT_FOUND,

            AppError::LibraryAlreadyExists
            | AppError::SyncAlreadyInProgress { .. }
            | AppError::Conflict { .. } => StatusCode::CONFLICT,

            AppError::RateLimited { .. } | AppError::RateExceededDaily { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }

            AppError::External { .. } => StatusCode::BAD_GATEWAY,

            AppError::Database(_)
            | AppError::QueueBackend(_)
            | AppError::Configuration { .. }
            | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code string; clients key user-visible messages off this.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::InvalidField { .. } => "INVALID_FIELD_VALUE",
            AppError::NotFound { .. } => "RESOURCE_NOT_FOUND",
            AppError::LibraryAlreadyExists => "LIBRARY_ALREADY_EXISTS",
            AppError::SyncAlreadyInProgress { .. } => "SYNC_ALREADY_IN_PROGRESS",
            AppError::Conflict { .. } => "RESOURCE_CONFLICT",
            AppError::InvalidCredentials => "AUTH_INVALID_CREDENTIALS",
            AppError::TokenRequired => "AUTH_TOKEN_REQUIRED",
            AppError::TokenInvalid => "AUTH_TOKEN_INVALID",
            AppError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::RateExceededDaily { .. } => "RATE_EXCEEDED_DAILY",
            AppError::External { .. } => "EXTERNAL_SERVICE_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::QueueBackend(_) => "QUEUE_BACKEND_ERROR",
            AppError::Configuration { .. } => "CONFIGURATION_ERROR",
            AppError::Internal { .. } => "INTERNAL_SERVER_ERROR",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Validation(errors) => {
                let fields: Vec<&str> = errors.field_errors().keys().copied().collect();
                Some(json!({ "fields": fields }))
            }
            AppError::InvalidField { field, message } => {
                Some(json!({ "field": field, "message": message }))
            }
            AppError::SyncAlreadyInProgress { operation_id } => {
                operation_id.map(|id| json!({ "operation_id": id }))
            }
            AppError::RateLimited { retry_after } => {
                retry_after.map(|secs| json!({ "retry_after": secs }))
            }
            AppError::RateExceededDaily { platform } => Some(json!({ "platform": platform })),
            AppError::External { service, message } => {
                Some(json!({ "service": service, "message": message }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let trace_id = Uuid::new_v4().to_string();
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(trace_id = %trace_id, error_code = %code, error = %self, "request failed");
        } else {
            tracing::info!(trace_id = %trace_id, error_code = %code, error = %self, "request rejected");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                details: self.details(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                trace_id,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::Validation(err)
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::QueueBackend(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for AppError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        AppError::QueueBackend(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal {
            message: Some(format!("serialization error: {}", err)),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal {
            message: Some(err.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AppError::TokenInvalid
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_errors_map_to_409() {
        assert_eq!(
            AppError::SyncAlreadyInProgress { operation_id: None }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::LibraryAlreadyExists.status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = AppError::RateLimited {
            retry_after: Some(120),
        };
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.details().unwrap()["retry_after"], 120);
    }

    #[test]
    fn sync_conflict_exposes_running_operation() {
        let op = Uuid::new_v4();
        let err = AppError::SyncAlreadyInProgress {
            operation_id: Some(op),
        };
        assert_eq!(err.error_code(), "SYNC_ALREADY_IN_PROGRESS");
        assert_eq!(err.details().unwrap()["operation_id"], json!(op));
    }
}
