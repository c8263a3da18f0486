//! HTTP error rendering.
//!
//! `HttpAppError` wraps `labtasker_core::ApiError` so we can implement
//! axum's `IntoResponse` for it (orphan rule: both the trait and the error
//! type live in other crates). Handlers return
//! `Result<impl IntoResponse, HttpAppError>` and use `?` on repository
//! calls.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use labtasker_core::ApiError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

#[derive(Debug)]
pub struct HttpAppError(pub ApiError);

impl From<ApiError> for HttpAppError {
    fn from(err: ApiError) -> Self {
        HttpAppError(err)
    }
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %err, "Request failed");
        } else {
            tracing::debug!(error = %err, "Request rejected");
        }
        let body = ErrorResponse {
            error: err.client_message(),
            error_type: Some(err.error_type().to_string()),
        };
        (status, Json(body)).into_response()
    }
}
