//! Mapping of daemon errors onto the HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::JinadError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Error wrapper implementing the client-facing serialization
/// `{detail: <class>, body: <lines>}`.
pub struct ApiError(pub JinadError);

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<JinadError> for ApiError {
    fn from(error: JinadError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            JinadError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            JinadError::UnknownObject(_) => StatusCode::NOT_FOUND,
            JinadError::WorkspaceNotReady(_)
            | JinadError::ImageBuildFailed(_)
            | JinadError::ContainerLaunchFailed { .. }
            | JinadError::PartialDaemonUnreachable(_)
            | JinadError::PartialDaemonError { .. }
            | JinadError::InvalidDockerfile(_) => StatusCode::BAD_REQUEST,
            JinadError::DockerUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // A partial daemon's own error envelope passes through unchanged, so
        // whoever is debugging an executor sees the actual stack.
        if let JinadError::PartialDaemonError { body } = &self.0 {
            if let Ok(envelope) = serde_json::from_str::<Value>(body) {
                if envelope.get("detail").is_some() {
                    return (status, Json(envelope)).into_response();
                }
            }
        }

        let body: Vec<String> = self.0.to_string().lines().map(str::to_string).collect();
        (
            status,
            Json(json!({ "detail": self.0.name(), "body": body })),
        )
            .into_response()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_taxonomy() {
        let cases = [
            (JinadError::Validation("x".into()), 422),
            (JinadError::UnknownObject("x".into()), 404),
            (JinadError::WorkspaceNotReady("x".into()), 400),
            (JinadError::ImageBuildFailed("x".into()), 400),
            (JinadError::PartialDaemonUnreachable("x".into()), 400),
            (JinadError::DockerUnavailable("x".into()), 500),
        ];
        for (error, expected) in cases {
            let response = ApiError(error).into_response();
            assert_eq!(response.status().as_u16(), expected);
        }
    }

    #[test]
    fn test_partial_daemon_body_passes_through() {
        let body = r#"{"detail":"PeaStartException","body":["trace line 1","trace line 2"]}"#;
        let response = ApiError(JinadError::PartialDaemonError {
            body: body.to_string(),
        })
        .into_response();
        assert_eq!(response.status().as_u16(), 400);
    }
}
