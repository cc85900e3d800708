use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Error type shared by the HTTP layer of every service.
///
/// Three families: user-correctable input problems (`ValidationError`,
/// `BadRequest`, `NotFound`, `Conflict`), authorization failures
/// (`Unauthorized`, `Forbidden`), and unexpected failures (`InternalError`,
/// `DatabaseError`, `BadGateway`, `ConfigError`). Only the first family
/// echoes its message to the caller; the others answer with a generic message
/// and leave the detail in the logs.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Forbidden: {0}")]
    Forbidden(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Bad Gateway: {0}")]
    BadGateway(String),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_) | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "validation_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::InternalError(_) => "internal_error",
            AppError::BadGateway(_) => "bad_gateway",
            AppError::ServiceUnavailable => "service_unavailable",
            AppError::DatabaseError(_) => "db_error",
            AppError::ConfigError(_) => "config_error",
        }
    }

    /// True for failures the caller cannot fix by changing the request.
    pub fn is_unexpected(&self) -> bool {
        matches!(
            self,
            AppError::InternalError(_)
                | AppError::DatabaseError(_)
                | AppError::ConfigError(_)
                | AppError::BadGateway(_)
                | AppError::ServiceUnavailable
        )
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let (error, details) = match &self {
            AppError::ValidationError(err) => {
                ("Validation error".to_string(), Some(err.to_string()))
            }
            AppError::BadRequest(err) | AppError::NotFound(err) | AppError::Conflict(err) => {
                (err.to_string(), None)
            }
            AppError::Unauthorized(err) | AppError::Forbidden(err) => {
                tracing::warn!(kind = self.kind(), reason = %err, "Request rejected");
                (
                    status
                        .canonical_reason()
                        .unwrap_or("Unauthorized")
                        .to_string(),
                    None,
                )
            }
            AppError::BadGateway(msg) => {
                tracing::error!(kind = self.kind(), error = %msg, "Upstream failure");
                ("Bad Gateway".to_string(), None)
            }
            AppError::ServiceUnavailable => ("Service unavailable".to_string(), None),
            AppError::InternalError(err)
            | AppError::DatabaseError(err)
            | AppError::ConfigError(err) => {
                tracing::error!(kind = self.kind(), error = ?err, "Request failed");
                ("Internal server error".to_string(), None)
            }
        };

        (status, Json(ErrorResponse { error, details })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unexpected_errors_hide_details() {
        let response =
            AppError::DatabaseError(anyhow::anyhow!("relation \"invoices\" missing")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
        assert!(json.get("details").is_none());
    }

    #[tokio::test]
    async fn unauthorized_uses_generic_message() {
        let response = AppError::Unauthorized(anyhow::anyhow!("key mismatch")).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Unauthorized");
    }

    #[test]
    fn classifies_unexpected_errors() {
        assert!(AppError::ServiceUnavailable.is_unexpected());
        assert!(AppError::BadGateway("timeout".into()).is_unexpected());
        assert!(!AppError::NotFound(anyhow::anyhow!("invoice")).is_unexpected());
        assert_eq!(
            AppError::Conflict(anyhow::anyhow!("dup")).status_code(),
            StatusCode::CONFLICT
        );
    }
}
