use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use codeframe_core::CoreError;

/// HTTP mapping for core errors. Validation → 422, conflicts → 409,
/// preconditions → structured 500, everything else → 500.
pub struct ApiError(pub CoreError);

/// Plain 404 with a JSON body.
pub fn not_found(what: impl Into<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": what.into()})),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            CoreError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation"),
            CoreError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            CoreError::Precondition(_) => (StatusCode::INTERNAL_SERVER_ERROR, "precondition"),
            CoreError::Budget(_) => (StatusCode::INTERNAL_SERVER_ERROR, "budget"),
            CoreError::ExternalTool(_) => (StatusCode::BAD_GATEWAY, "external_tool"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "API error");
        }
        (
            status,
            Json(serde_json::json!({"error": self.0.to_string(), "kind": kind})),
        )
            .into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}
