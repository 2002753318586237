//! Liveness plus a view of the in-process workflow load.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health))]
pub struct HealthApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Returns `{"status": "ok", "version", "liveWorkflows", "maxConcurrent"}`.
///
/// `liveWorkflows` counts queued and running workflows in this process.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = Value)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let live = state.orchestrator.storage().live().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "liveWorkflows": live,
        "maxConcurrent": state.config.max_concurrent,
    }))
}

#[cfg(test)]
mod test {
    use answerflow_core::testing::TestPipeline;

    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn health_reports_version_and_workflow_load() {
        let pipeline = TestPipeline::start();
        let config = Config::from_lookup(|key| {
            (key == "ANSWERFLOW_MAX_CONCURRENT").then(|| "3".to_owned())
        });
        let state = Arc::new(AppState {
            config: Arc::new(config),
            orchestrator: pipeline.orchestrator.clone(),
            events: pipeline.router.clone(),
        });

        let Json(body) = get_health(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert!(!body["version"].as_str().unwrap_or("").is_empty());
        assert_eq!(body["liveWorkflows"], 0);
        assert_eq!(body["maxConcurrent"], 3);
    }
}
