use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::state::AppState;

/// Bearer-token gate for the storage notification endpoint.
///
/// Open when no `ANSWERFLOW_EVENTS_TOKEN` is configured.
pub async fn check_events_auth(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(expected_token) = state.config.events_token.as_deref() {
        let provided = req
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected_token) {
            warn!(path = %req.uri().path(), "rejected unauthenticated event delivery");
            return (
                StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({ "error": "unauthorised" })),
            )
                .into_response();
        }
    }
    next.run(req).await
}
