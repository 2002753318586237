//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON-body response
//! with an appropriate status code.
//!
//! Collaborator failures (store, blob, media, transcription) are logged in
//! full but answered with a generic message, so bucket names, paths and
//! store responses never reach clients.

use answerflow_core::PipelineError;
use answerflow_core::services::blob::BlobError;
use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A multipart body could not be read, including one over the size limit.
    #[error(transparent)]
    Multipart(#[from] MultipartError),
}

impl ServerError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Multipart(e) => (e.status(), e.body_text()),
            ServerError::Pipeline(e) => match e {
                PipelineError::Validation(_) | PipelineError::UnsupportedFormat(_) => {
                    (StatusCode::BAD_REQUEST, e.to_string())
                }
                PipelineError::Conflict(_) => (StatusCode::CONFLICT, e.to_string()),
                PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
                PipelineError::QueueFull { .. } | PipelineError::Shutdown => {
                    (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
                }
                PipelineError::Blob(BlobError::Unsupported(_)) => (
                    StatusCode::NOT_IMPLEMENTED,
                    "not supported by the configured blob store".to_owned(),
                ),
                _ => {
                    error!(error = %e, "pipeline error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal server error".to_owned(),
                    )
                }
            },
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = self.status_and_message();
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pipeline_errors_map_to_status_codes() {
        let cases = [
            (PipelineError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (PipelineError::UnsupportedFormat("x".into()), StatusCode::BAD_REQUEST),
            (PipelineError::Conflict("m/q".into()), StatusCode::CONFLICT),
            (PipelineError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (PipelineError::QueueFull { capacity: 1 }, StatusCode::SERVICE_UNAVAILABLE),
            (PipelineError::Shutdown, StatusCode::SERVICE_UNAVAILABLE),
            (
                PipelineError::Blob(BlobError::Unsupported("presign".into())),
                StatusCode::NOT_IMPLEMENTED,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status_and_message().0, status);
        }
    }

    #[test]
    fn internal_details_stay_private() {
        let err = ServerError::from(PipelineError::Blob(BlobError::not_found("secret-bucket", "k")));
        let (status, message) = err.status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("secret-bucket"));
    }
}
