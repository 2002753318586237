//! Axum router construction.
//!
//! [`build`] assembles the complete application router:
//! - Middleware layers (CORS, tower-http tracing, per-request trace-ID injection)
//! - Optional OpenAPI document (disable with `ANSWERFLOW_ENABLE_API_DOCS=false`)
//! - Health / heartbeat route
//! - `/v1` answer and storage-event routes

pub mod doc;
mod health;
mod v1;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router, middleware};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .merge(health::router())
        .nest("/v1", v1::router(state.clone()));

    if state.config.enable_api_docs {
        let api_doc = Arc::new(doc::get_docs());
        app = app.route(
            "/api-docs/openapi.json",
            get(move || {
                let api_doc = Arc::clone(&api_doc);
                async move { Json(api_doc.as_ref().clone()) }
            }),
        );
    }

    app
        // Outermost layers execute first on the way in.
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors::cors_layer(&state)),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            trace::trace_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use answerflow_core::{MentorImage, SubmissionKey, WorkflowStatus};
    use answerflow_core::layout::{TRANSCRIBE_JSON, TRANSCRIBE_VTT};
    use answerflow_core::services::transcribe::TranscriptDocument;
    use answerflow_core::testing::{TestPipeline, probe_info};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use tracing_test::traced_test;

    use super::*;
    use crate::config::Config;

    const UPLOAD: &str = "incoming/answer.bin";
    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01\x08\x06\x00\x00\x00";
    const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0\x00\x10JFIF\x00\x01\x01\x00\x00\x01\x00\x01\x00\x00";
    const VTT: &str = "WEBVTT\n\n00:00:00.000 --> 00:00:01.000\nhello\n";

    fn app(pipeline: &TestPipeline, vars: &[(&str, &str)]) -> Router {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        let config = Config::from_lookup(|key| {
            vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        });
        build(Arc::new(AppState {
            config: Arc::new(config),
            orchestrator: pipeline.orchestrator.clone(),
            events: pipeline.router.clone(),
        }))
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.expect("infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    fn image_request(uri: &str, field: &str, content_type: &str, image: &[u8]) -> Request<Body> {
        let boundary = "answerflow-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"image\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(image);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .expect("request")
    }

    fn upload_body() -> Value {
        json!({ "mentor": "m1", "question": "q1", "uploadKey": UPLOAD })
    }

    #[tokio::test]
    async fn health_and_api_docs_are_served() {
        let pipeline = TestPipeline::start();
        let app = app(&pipeline, &[]);

        let (status, body) = send(&app, empty_request("GET", "/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app, empty_request("GET", "/api-docs/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/v1/answers/upload"].is_object());
        assert!(body["paths"]["/v1/events/storage"].is_object());
        assert!(body["paths"]["/v1/answers/upload-url"].is_object());
        assert!(body["paths"]["/v1/mentors/{mentor}/thumbnail"].is_object());

        let hidden = self::app(&pipeline, &[("ANSWERFLOW_ENABLE_API_DOCS", "false")]);
        let (status, _) = send(&hidden, empty_request("GET", "/api-docs/openapi.json")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn upload_is_accepted_then_blocks_a_second_one_until_cancelled() {
        let pipeline = TestPipeline::start();
        pipeline.upload(UPLOAD, &probe_info("mp4", 10.0));
        let app = app(&pipeline, &[]);

        let (status, body) = send(&app, json_request("POST", "/v1/answers/upload", upload_body())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["statusUrl"], "/v1/answers/m1/q1/status");
        assert_eq!(body["tasks"].as_array().map(Vec::len), Some(3));

        let (status, body) = send(&app, json_request("POST", "/v1/answers/upload", upload_body())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap_or("").contains("m1/q1"));

        let (status, body) = send(&app, empty_request("GET", "/v1/answers/m1/q1/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mentor"], "m1");
        assert_eq!(body["tasks"].as_array().map(Vec::len), Some(3));

        let (status, _) = send(&app, empty_request("POST", "/v1/answers/m1/q1/cancel")).await;
        assert_eq!(status, StatusCode::OK);
        let set = pipeline.settled(&SubmissionKey::new("m1", "q1")).await;
        assert_eq!(set.status, WorkflowStatus::Cancelled);
    }

    #[tokio::test]
    async fn rejected_uploads_map_to_client_errors() {
        let pipeline = TestPipeline::start();
        let app = app(&pipeline, &[]);

        let (status, _) = send(
            &app,
            json_request("POST", "/v1/answers/upload", json!({ "mentor": "m1", "question": "q1", "uploadKey": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, json_request("POST", "/v1/answers/upload", upload_body())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, empty_request("GET", "/v1/answers/m1/q1/status")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let (status, _) = send(&app, empty_request("POST", "/v1/answers/m1/q1/cancel")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn uploaded_subtitles_are_validated_and_stored() {
        let pipeline = TestPipeline::start();
        let app = app(&pipeline, &[]);

        let put = |body: &'static str| {
            Request::builder()
                .method("PUT")
                .uri("/v1/answers/m1/q1/vtt")
                .header(header::CONTENT_TYPE, "text/vtt")
                .body(Body::from(body))
                .expect("request")
        };

        let (status, _) = send(&app, put("not subtitles")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(pipeline.blobs.object("static", "videos/m1/q1/en.vtt").is_none());

        let (status, body) = send(&app, put(VTT)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["key"], "videos/m1/q1/en.vtt");
        assert!(pipeline.blobs.object("static", "videos/m1/q1/en.vtt").is_some());
    }

    #[tokio::test]
    #[traced_test]
    async fn storage_events_need_the_token_and_resume_transcription() {
        let pipeline = TestPipeline::start();
        pipeline.upload(UPLOAD, &probe_info("mp4", 10.0));
        let app = app(&pipeline, &[("ANSWERFLOW_EVENTS_TOKEN", "secret")]);

        let (status, _) = send(&app, json_request("POST", "/v1/answers/upload", upload_body())).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let job = loop {
            if let Some(job) = pipeline.transcriber.jobs().into_iter().next() {
                break job;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };
        let json_key = format!("{}/{TRANSCRIBE_JSON}", job.output_prefix);
        let vtt_key = format!("{}/{TRANSCRIBE_VTT}", job.output_prefix);
        let document = serde_json::to_vec(&TranscriptDocument::from_text("hello")).expect("json");
        pipeline.blobs.insert(&job.output_bucket, &json_key, document, "application/json");
        pipeline.blobs.insert(&job.output_bucket, &vtt_key, VTT, "text/vtt");

        let record = |key: &str| json!({ "s3": { "bucket": { "name": job.output_bucket }, "object": { "key": key } } });
        let notification = json!({ "Records": [record(&json_key), record(&vtt_key)] });

        let (status, body) = send(&app, json_request("POST", "/v1/events/storage", notification.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorised");
        assert!(logs_contain("rejected unauthenticated event delivery"));

        let mut authorised = json_request("POST", "/v1/events/storage", notification);
        authorised
            .headers_mut()
            .insert(header::AUTHORIZATION, "Bearer secret".parse().expect("header"));
        let (status, body) = send(&app, authorised).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], 2);

        let set = pipeline.settled(&SubmissionKey::new("m1", "q1")).await;
        assert_eq!(set.status, WorkflowStatus::Done);
        let answer = pipeline.store.answer(&SubmissionKey::new("m1", "q1")).expect("answer");
        assert_eq!(answer.transcript.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn upload_urls_are_signed_within_the_size_limit() {
        let pipeline = TestPipeline::start();
        let app = app(&pipeline, &[("ANSWERFLOW_MAX_UPLOAD_BYTES", "4096")]);

        let (status, body) = send(
            &app,
            json_request("POST", "/v1/answers/upload-url", json!({ "uploader": "mentor-1", "size": 4096 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let key = body["key"].as_str().unwrap_or_default();
        assert!(key.starts_with("mentor-1/"), "{key}");
        assert_eq!(body["method"], "PUT");
        assert_eq!(body["expiresInSecs"], 3600);
        assert_eq!(body["maxBytes"], 4096);
        assert_eq!(body["headers"]["content-length"], "4096");

        let (status, _) = send(
            &app,
            json_request("POST", "/v1/answers/upload-url", json!({ "uploader": "mentor-1", "size": 4097 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn mentor_images_are_checked_then_stored() {
        let pipeline = TestPipeline::start();
        let app = app(&pipeline, &[("ANSWERFLOW_MAX_IMAGE_BYTES", "1024")]);

        let (status, body) = send(
            &app,
            image_request("/v1/mentors/mentor-1/thumbnail", "image", "image/png", PNG),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let key = body["key"].as_str().unwrap_or_default().to_owned();
        assert!(key.starts_with("mentor/thumbnails/mentor-1/"), "{key}");
        assert!(key.ends_with("/thumbnail.png"), "{key}");
        assert!(pipeline.blobs.object("static", &key).is_some());
        assert_eq!(
            pipeline.store.mentor_image("mentor-1", MentorImage::Thumbnail),
            Some(key)
        );

        let (status, body) = send(
            &app,
            image_request("/v1/mentors/mentor-1/virtual-background", "image", "image/jpeg", JPEG),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["url"].as_str().unwrap_or_default().ends_with("/virtual_background.jpg"));

        let (status, _) = send(
            &app,
            image_request("/v1/mentors/mentor-1/thumbnail", "image", "image/jpeg", JPEG),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            image_request("/v1/mentors/mentor-1/thumbnail", "picture", "image/png", PNG),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap_or_default().contains("image"));

        let (status, _) = send(
            &app,
            image_request("/v1/mentors/mentor-1/thumbnail", "image", "image/png", &[0x89; 4096]),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    #[traced_test]
    async fn answer_requests_are_logged_with_their_mentor_and_question() {
        let pipeline = TestPipeline::start();
        let app = app(&pipeline, &[]);

        let (status, _) = send(&app, empty_request("GET", "/v1/answers/m7/q9/status")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(logs_contain("mentor=m7"));
        assert!(logs_contain("question=q9"));
    }

    #[tokio::test]
    async fn unrelated_storage_events_are_acknowledged() {
        let pipeline = TestPipeline::start();
        let app = app(&pipeline, &[]);
        let notification = json!({ "Records": [
            { "s3": { "bucket": { "name": "uploads" }, "object": { "key": "some+file.mp4" } } }
        ] });

        let (status, body) = send(&app, json_request("POST", "/v1/events/storage", notification)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], 1);
        assert_eq!(body["handled"], 0);
    }
}
