use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use gsecret_core::GsecretError;

/// Maps the fixed `GsecretError` taxonomy onto HTTP status codes and the
/// wire shape `GsecretFailure{reason, code}`.
pub struct ApiError(pub GsecretError);

impl From<GsecretError> for ApiError {
    fn from(err: GsecretError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.0.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "reason": self.0.reason,
            "code": self.0.code,
        }));
        (status, body).into_response()
    }
}
