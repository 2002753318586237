//! Subtitle maintenance outside the ingestion workflow: replacing the
//! subtitle track with an uploaded document, or rebuilding it from the
//! stored transcript.

use bytes::Bytes;
use serde::Serialize;
use tracing::info;

use crate::layout::{public_url, rendition_key, vtt_key};
use crate::runtime::context::Services;
use crate::runtime::error::PipelineError;
use crate::runtime::types::{Media, MediaTag, SubmissionKey, VideoFileType};
use crate::services::store::AnswerUpdate;
use crate::subtitle::{VTT_CONTENT_TYPE, transcript_to_vtt, validate_vtt};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VttReceipt {
    pub key: String,
    pub url: String,
    pub text: String,
}

/// Validate and publish `document` as the answer's `en` subtitles.
pub async fn store_vtt(
    services: &Services,
    key: &SubmissionKey,
    document: &str,
) -> Result<VttReceipt, PipelineError> {
    validate_vtt(document)?;
    let object = vtt_key(key);
    services
        .blobs
        .put_object(
            &services.config.buckets.static_assets,
            &object,
            Bytes::copy_from_slice(document.as_bytes()),
            VTT_CONTENT_TYPE,
        )
        .await?;
    services
        .store
        .update_answer(AnswerUpdate::new(key.clone()).media(Media::subtitles(&object)))
        .await?;
    info!(%key, bytes = document.len(), "subtitles stored");
    Ok(VttReceipt {
        url: public_url(&services.config.static_url_base, &object),
        key: object,
        text: document.to_owned(),
    })
}

async fn web_duration(services: &Services, key: &SubmissionKey, recorded: Option<f64>) -> Result<f64, PipelineError> {
    if let Some(duration) = recorded.filter(|d| *d > 0.0) {
        return Ok(duration);
    }
    let scratch = services.config.scratch_dir()?;
    let video = scratch.path().join("web");
    let object = rendition_key(key, "web", VideoFileType::Mp4.extension());
    services
        .blobs
        .download_to(&services.config.buckets.static_assets, &object, &video)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                PipelineError::NotFound(format!("web video for {key}"))
            } else {
                e.into()
            }
        })?;
    Ok(services.media.probe(&video).await?.duration)
}

/// Rebuild the subtitles from the stored transcript, timed against the
/// web rendition.
pub async fn regenerate_vtt(services: &Services, key: &SubmissionKey) -> Result<VttReceipt, PipelineError> {
    let answer = services
        .store
        .fetch_answer(key)
        .await?
        .ok_or_else(|| PipelineError::NotFound(format!("answer {key}")))?;
    let transcript = answer
        .transcript
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| PipelineError::Validation(format!("answer {key} has no transcript")))?;

    let recorded = answer.media(MediaTag::Web).and_then(|m| m.duration);
    let duration = web_duration(services, key, recorded).await?;
    let document = transcript_to_vtt(transcript, duration).ok_or_else(|| {
        PipelineError::Validation(format!("web video for {key} has no duration"))
    })?;
    store_vtt(services, key, &document).await
}
