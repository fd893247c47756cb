use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

static EXPOSE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

/// Include internal error details in 500 responses. Only enabled in development.
pub fn expose_internal_details(enabled: bool) {
    EXPOSE_INTERNAL_DETAILS.store(enabled, Ordering::Relaxed);
}

fn internal_details(detail: String) -> Option<Value> {
    if EXPOSE_INTERNAL_DETAILS.load(Ordering::Relaxed) {
        Some(Value::String(detail))
    } else {
        None
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Authentication error: {0}")]
    AuthError(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Invalid state transition: {message} (current state: {current_state})")]
    InvalidState {
        message: String,
        current_state: String,
    },

    #[error("Expired: {0}")]
    Expired(anyhow::Error),

    #[error("Already signed at {signed_at}")]
    AlreadySigned { signed_at: DateTime<Utc> },

    #[error("Cancelled: {0}")]
    Cancelled(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    pub fn invalid_state(message: impl Into<String>, current_state: impl Into<String>) -> Self {
        AppError::InvalidState {
            message: message.into(),
            current_state: current_state.into(),
        }
    }

    /// Stable machine-readable error kind, also used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "validation_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::AuthError(_) => "unauthorized",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidState { .. } => "invalid_state",
            AppError::Expired(_) => "expired",
            AppError::AlreadySigned { .. } => "already_signed",
            AppError::Cancelled(_) => "cancelled",
            AppError::InternalError(_) => "internal_error",
            AppError::DatabaseError(_) => "database_error",
            AppError::ConfigError(_) => "configuration_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_)
            | AppError::BadRequest(_)
            | AppError::InvalidState { .. }
            | AppError::AlreadySigned { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Expired(_) | AppError::Cancelled(_) => StatusCode::GONE,
            AppError::InternalError(_) | AppError::DatabaseError(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
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

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            details: Option<Value>,
        }

        let status = self.status_code();
        let code = self.code();

        let (error_message, details) = match self {
            AppError::ValidationError(err) => (
                "Validation error".to_string(),
                serde_json::to_value(&err).ok(),
            ),
            AppError::BadRequest(err)
            | AppError::NotFound(err)
            | AppError::AuthError(err)
            | AppError::Conflict(err)
            | AppError::Expired(err)
            | AppError::Cancelled(err) => (err.to_string(), None),
            AppError::InvalidState {
                message,
                current_state,
            } => (message, Some(json!({ "current_state": current_state }))),
            AppError::AlreadySigned { signed_at } => (
                "Document has already been signed".to_string(),
                Some(json!({ "signed_at": signed_at })),
            ),
            AppError::InternalError(err) => {
                tracing::error!(error = ?err, "Internal error");
                (
                    "Internal server error".to_string(),
                    internal_details(format!("{:#?}", err)),
                )
            }
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                ("Database error".to_string(), internal_details(err.to_string()))
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                (
                    "Configuration error".to_string(),
                    internal_details(err.to_string()),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: error_message,
                code,
                details,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn invalid_state_exposes_current_state() {
        let response = AppError::invalid_state("Quote already invoiced", "invoiced").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["code"], "invalid_state");
        assert_eq!(body["details"]["current_state"], "invoiced");
    }

    #[tokio::test]
    async fn signature_terminal_errors_have_distinct_codes() {
        let expired = AppError::Expired(anyhow::anyhow!("Signature request expired"));
        let cancelled = AppError::Cancelled(anyhow::anyhow!("Signature request cancelled"));
        let signed = AppError::AlreadySigned {
            signed_at: Utc::now(),
        };

        assert_eq!(expired.status_code(), StatusCode::GONE);
        assert_eq!(cancelled.status_code(), StatusCode::GONE);
        assert_eq!(signed.status_code(), StatusCode::BAD_REQUEST);
        assert_ne!(expired.code(), cancelled.code());

        let body = body_json(signed.into_response()).await;
        assert_eq!(body["code"], "already_signed");
        assert!(body["details"]["signed_at"].is_string());
    }

    #[tokio::test]
    async fn internal_errors_hide_details_by_default() {
        expose_internal_details(false);
        let response =
            AppError::DatabaseError(anyhow::anyhow!("relation \"invoices\" missing")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(response).await;
        assert_eq!(body["error"], "Database error");
        assert!(body.get("details").is_none());
    }

    #[test]
    fn conflict_is_retryable_status() {
        let err = AppError::Conflict(anyhow::anyhow!("Document number already taken"));
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "conflict");
    }
}
