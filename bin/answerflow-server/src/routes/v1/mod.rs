pub mod answers;
pub mod events;
pub mod mentors;

use std::sync::Arc;

use axum::Router;
use utoipa::OpenApi;

use crate::state::AppState;

/// Routes nested under `/v1`.
pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .merge(answers::router())
        .merge(mentors::router(state.config.max_image_bytes))
        .merge(events::router(state))
}

#[derive(OpenApi)]
#[openapi()]
pub struct V1Api;

pub fn api_docs() -> utoipa::openapi::OpenApi {
    let mut spec = V1Api::openapi();
    spec.merge(answers::AnswersApi::openapi());
    spec.merge(mentors::MentorsApi::openapi());
    spec.merge(events::EventsApi::openapi());
    spec
}
