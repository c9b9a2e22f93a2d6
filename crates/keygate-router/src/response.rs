use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use keygate_channel::ChannelError;
use keygate_core::CoreError;

/// Administrative error envelope: `{code, message}` with the status aligned
/// to the error kind.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "resource_not_found",
            message: message.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let (status, code) = match &err {
            CoreError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "resource_not_found"),
            // Admin endpoints answer 500 here; the proxy path maps this to
            // 503 separately.
            CoreError::NoActiveKeys(_) => (StatusCode::INTERNAL_SERVER_ERROR, "no_active_keys"),
            CoreError::Upstream { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "upstream_error"),
            CoreError::Decryption { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "decryption_failure")
            }
            CoreError::EmptyModelList => (StatusCode::INTERNAL_SERVER_ERROR, "upstream_error"),
            CoreError::UnexpectedResponseFormat => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "unexpected_response_format",
            ),
            CoreError::Channel(ChannelError::UnknownChannelType(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "unknown_channel_type")
            }
            CoreError::Channel(_) => (StatusCode::INTERNAL_SERVER_ERROR, "upstream_error"),
            CoreError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "code": self.code, "message": self.message })),
        )
            .into_response()
    }
}
