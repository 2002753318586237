use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use http_body_util::BodyExt;
use tracing::field::{self, Empty};
use tracing::{Instrument, Span, info, info_span, warn};
use uuid::Uuid;

use crate::state::AppState;

pub static X_TRACE_ID: &str = "x-trace-id";

/// Bodies at or above this size are summarised instead of logged.
const MAX_LOGGED_BODY: usize = 1024;

/// Mentor and question named by a `/v1/answers/...` or `/v1/mentors/...`
/// path, if any.
fn answer_scope(path: &str) -> (Option<&str>, Option<&str>) {
    let mut parts = path.trim_start_matches('/').split('/');
    if parts.next() != Some("v1") {
        return (None, None);
    }
    match (parts.next(), parts.next(), parts.next()) {
        (Some("answers"), Some(mentor), Some(question))
            if !mentor.is_empty() && !question.is_empty() =>
        {
            (Some(mentor), Some(question))
        }
        (Some("mentors"), Some(mentor), _) if !mentor.is_empty() => (Some(mentor), None),
        _ => (None, None),
    }
}

/// Tag every request with a trace id (reusing the caller's when it is a
/// valid UUID) and log both bodies inside one `http_request` span. Requests
/// about one answer or mentor also carry `mentor` and `question`.
pub async fn trace_middleware(
    State(_state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let trace_header = HeaderValue::from_str(&trace_id.to_string()).ok();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
        mentor = Empty,
        question = Empty,
    );
    record_scope(&span, req.uri().path());

    async move {
        info!("→ request started");
        let (parts, body) = req.into_parts();
        let req_bytes = buffer_and_log("request", &parts.headers, body).await;
        let mut req = Request::from_parts(parts, Body::from(req_bytes));
        if let Some(value) = &trace_header {
            req.headers_mut().insert(X_TRACE_ID, value.clone());
        }

        let response = next.run(req).await;

        let (parts, body) = response.into_parts();
        let res_bytes = buffer_and_log("response", &parts.headers, body).await;
        let mut response = Response::from_parts(parts, Body::from(res_bytes));
        if let Some(value) = trace_header {
            response.headers_mut().insert(X_TRACE_ID, value);
        }

        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            "← response finished"
        );
        response
    }
    .instrument(span)
    .await
}

fn record_scope(span: &Span, path: &str) {
    let (mentor, question) = answer_scope(path);
    if let Some(mentor) = mentor {
        span.record("mentor", field::display(mentor));
    }
    if let Some(question) = question {
        span.record("question", field::display(question));
    }
}

async fn buffer_and_log(direction: &str, headers: &header::HeaderMap, body: Body) -> Bytes {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let is_text = content_type.contains("application/json") || content_type.starts_with("text/");

    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(direction, error = %e, "failed to buffer body");
            return Bytes::new();
        }
    };

    if is_text && bytes.len() < MAX_LOGGED_BODY {
        if let Ok(text) = std::str::from_utf8(&bytes) {
            info!("{direction} body: {text}");
        }
    } else if !bytes.is_empty() {
        info!("{direction} body: [skipped: type={content_type}, size={}]", bytes.len());
    }
    bytes
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scope_comes_from_answer_and_mentor_paths() {
        assert_eq!(answer_scope("/v1/answers/m1/q1/status"), (Some("m1"), Some("q1")));
        assert_eq!(answer_scope("/v1/answers/m1/q1/vtt/regenerate"), (Some("m1"), Some("q1")));
        assert_eq!(answer_scope("/v1/mentors/mentor-1/thumbnail"), (Some("mentor-1"), None));
        assert_eq!(answer_scope("/v1/answers/upload"), (None, None));
        assert_eq!(answer_scope("/v1/answers/upload-url"), (None, None));
        assert_eq!(answer_scope("/v1/events/storage"), (None, None));
        assert_eq!(answer_scope("/health"), (None, None));
    }
}
