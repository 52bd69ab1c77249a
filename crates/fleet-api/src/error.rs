//! Mapping of workflow failures onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use fleet_cluster::{ControlError, ErrorKind};

/// A failed request: `{"kind": "Error", "message": ...}` with a status
/// chosen by the error's kind.
#[derive(Debug)]
pub struct ApiError(pub ControlError);

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError(ControlError::Validation(message.into()))
    }

    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ControlError> for ApiError {
    fn from(e: ControlError) -> Self {
        ApiError(e)
    }
}

impl From<fleet_state::StateError> for ApiError {
    fn from(e: fleet_state::StateError) -> Self {
        ApiError(ControlError::Store(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(json!({
                "kind": "Error",
                "message": self.0.public_message(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_kind() {
        assert_eq!(ApiError::validation("bad").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError(ControlError::not_authorized()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError(ControlError::NotFound("Cluster not found".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(fleet_state::StateError::Write("disk".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
