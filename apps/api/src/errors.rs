use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// A failed interview turn never persists partial state, so every variant
/// marked retryable can be resent by the client as the same turn.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The model answered, but its output did not match the expected schema.
    #[error("LLM output failed validation: {0}")]
    LlmValidation(String),

    #[error("LLM error: {0}")]
    Llm(String),

    /// An external collaborator (session directory) could not be reached.
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the caller may resend the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::LlmValidation(_)
                | AppError::Llm(_)
                | AppError::Upstream(_)
                | AppError::Database(_)
                | AppError::Cache(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retryable = self.is_retryable();
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::LlmValidation(msg) => {
                tracing::error!("LLM validation error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "LLM_VALIDATION_ERROR",
                    "The AI interviewer returned an unusable answer, please retry".to_string(),
                )
            }
            AppError::Llm(msg) => {
                tracing::error!("LLM error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "LLM_ERROR",
                    "An AI processing error occurred".to_string(),
                )
            }
            AppError::Upstream(msg) => {
                tracing::error!("Upstream error: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UPSTREAM_UNAVAILABLE",
                    "A required service is unavailable".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Cache(e) => {
                tracing::error!("Cache error: {e}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "CACHE_ERROR",
                    "A cache error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "retryable": retryable
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_failures_are_retryable() {
        assert!(AppError::Llm("timeout".into()).is_retryable());
        assert!(AppError::LlmValidation("bad json".into()).is_retryable());
        assert!(AppError::Upstream("supabase down".into()).is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(!AppError::NotFound("session".into()).is_retryable());
        assert!(!AppError::Validation("empty".into()).is_retryable());
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (AppError::LlmValidation("x".into()), StatusCode::BAD_GATEWAY),
            (AppError::Upstream("x".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
