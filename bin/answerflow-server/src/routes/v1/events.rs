//! Object-created notifications from blob storage.

use std::sync::Arc;

use answerflow_core::{PipelineEvent, StorageEvent};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router, middleware};
use tracing::debug;
use utoipa::OpenApi;

use crate::error::ServerError;
use crate::middleware::auth::check_events_auth;
use crate::schemas::v1::events::{
    EventsResponse, NotificationRecord, S3Bucket, S3Entity, S3Object, StorageNotification,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(storage_events),
    components(schemas(
        StorageNotification,
        NotificationRecord,
        S3Entity,
        S3Bucket,
        S3Object,
        EventsResponse
    ))
)]
pub struct EventsApi;

pub fn router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/events/storage", post(storage_events))
        .route_layer(middleware::from_fn_with_state(state, check_events_auth))
}

/// Decode an S3 notification key: `+` is a space, the rest is percent-encoded.
pub fn decode_object_key(raw: &str) -> Result<String, ServerError> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|k| k.into_owned())
        .map_err(|e| ServerError::BadRequest(format!("object key '{raw}' is not valid utf-8: {e}")))
}

/// Deliver object-created notifications to the stage waiting on them.
///
/// Redelivery is safe; a record for an already-collected job is skipped.
#[utoipa::path(
    post,
    path = "/v1/events/storage",
    tag = "events",
    request_body = StorageNotification,
    responses(
        (status = 200, description = "Notifications processed", body = EventsResponse),
        (status = 400, description = "Malformed object key"),
        (status = 401, description = "Missing or wrong bearer token"),
        (status = 500, description = "Handling failed; retry the delivery"),
    )
)]
pub async fn storage_events(
    State(state): State<Arc<AppState>>,
    Json(notification): Json<StorageNotification>,
) -> Result<Json<EventsResponse>, ServerError> {
    let received = notification.records.len();
    let mut handled = 0;
    for record in notification.records {
        let event = StorageEvent {
            bucket: record.s3.bucket.name,
            key: decode_object_key(&record.s3.object.key)?,
        };
        debug!(bucket = %event.bucket, key = %event.key, event_name = ?record.event_name, "storage event");
        if state.events.handle(PipelineEvent::ObjectCreated(event)).await?.is_some() {
            handled += 1;
        }
    }
    Ok(Json(EventsResponse { received, handled }))
}
