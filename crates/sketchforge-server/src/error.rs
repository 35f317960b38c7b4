//! Error types for the sketchforge server.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sketchforge_core::Error as CoreError;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Per-session in-flight request cap reached.
    #[error("too many sessions")]
    TooManySessions,

    /// Core error.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for handler operations.
pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::TooManySessions => (StatusCode::FORBIDDEN, "Too many sessions.".to_string()),
            ApiError::Core(err) => match err {
                CoreError::NotFound(ref what) => {
                    (StatusCode::NOT_FOUND, format!("Library {what} not found"))
                }
                CoreError::InvalidInput(_) | CoreError::CyclicDependency(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
                }
                // The toolchain's combined diagnostic text, verbatim. This is
                // the primary feedback surface for users.
                CoreError::Compile { log } => (StatusCode::INTERNAL_SERVER_ERROR, log),
                CoreError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, err.to_string()),
                CoreError::Offline => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
                other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
            },
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let response = ApiError::TooManySessions.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response =
            ApiError::Core(CoreError::NotFound("Servo".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError::Core(CoreError::InvalidInput("bad".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = ApiError::Core(CoreError::Compile {
            log: "boom".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
