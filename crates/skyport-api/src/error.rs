use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use skyport_types::StoreError;

/// Wraps [`StoreError`] for the boundary between the core pipeline and
/// HTTP. `StoreError::kind()` maps 1:1 onto a status code (spec §7); the
/// message text is escaped so a store-reported string can never inject
/// markup into a client that renders it directly.
#[derive(Debug)]
pub struct ApiError(pub StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError(err)
    }
}

fn status_for(err: &StoreError) -> StatusCode {
    match err.kind() {
        "not-found" => StatusCode::NOT_FOUND,
        "already-exists" => StatusCode::CONFLICT,
        "malformed-request" => StatusCode::BAD_REQUEST,
        "unauthorized" => StatusCode::UNAUTHORIZED,
        "forbidden" => StatusCode::FORBIDDEN,
        "conflict" => StatusCode::CONFLICT,
        "too-large" => StatusCode::PAYLOAD_TOO_LARGE,
        "connection-failed" => StatusCode::SERVICE_UNAVAILABLE,
        "expired" => StatusCode::BAD_REQUEST,
        "invalid" => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let message = html_escape(&self.0.to_string());
        tracing::warn!(kind = self.0.kind(), status = %status, "request failed");
        (status, Json(json!({ "message": message }))).into_response()
    }
}
