use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::models::ApiResponse;
use crate::error::{AssistantError, ErrorKind};

/// Unified API error type for all route handlers
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Assistant(AssistantError),
}

impl From<AssistantError> for ApiError {
    fn from(e: AssistantError) -> Self {
        ApiError::Assistant(e)
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::BadRequest(format!("Invalid upload: {}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, kind) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, Some(ErrorKind::Precondition)),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            ApiError::Assistant(e) => {
                let kind = e.kind();
                let status = match (&e, kind) {
                    (AssistantError::ProcessingTimeout { .. }, _) => StatusCode::GATEWAY_TIMEOUT,
                    (_, ErrorKind::Precondition) => StatusCode::BAD_REQUEST,
                    (_, ErrorKind::RemoteProcessing) | (_, ErrorKind::RemoteCall) => StatusCode::BAD_GATEWAY,
                    (_, ErrorKind::Cancelled) => StatusCode::CONFLICT,
                    (_, ErrorKind::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let message = if kind == ErrorKind::Internal {
                    tracing::error!("internal error: {}", e);
                    "internal server error".to_string()
                } else {
                    tracing::warn!("request failed ({:?}): {}", kind, e);
                    e.to_string()
                };
                (status, message, Some(kind))
            }
        };

        (status, Json(ApiResponse::<()>::error(message, kind))).into_response()
    }
}
