//! Trim: cut the canonical original down to the requested window and
//! overwrite it in place. Runs before anything else reads the original.

use tracing::{debug, info};

use super::{StageReport, precondition, settle};
use crate::layout::{canonical_key, public_url};
use crate::runtime::context::Services;
use crate::runtime::error::PipelineError;
use crate::runtime::types::{
    Media, MediaTag, StageRequest, TaskKind, TaskStatus, VideoFileType,
};
use crate::services::media::profile::trim_args;
use crate::services::media::sniff_file;
use crate::services::store::{AnswerUpdate, TaskStatusUpdate};

pub async fn run(services: &Services, req: &StageRequest) -> Result<StageReport, PipelineError> {
    if let Err(report) = precondition(services, req).await? {
        return Ok(report);
    }
    let result = trim(services, req).await;
    settle(services, req, result).await
}

async fn trim(services: &Services, req: &StageRequest) -> Result<StageReport, PipelineError> {
    let config = &services.config;
    // Bounds are trusted; a window outside the source fails in the encoder.
    let window = req.trim.ok_or_else(|| {
        PipelineError::Validation(format!("trim requested for {} without a window", req.key))
    })?;

    services
        .store
        .update_task_status(TaskStatusUpdate::task(
            req.key.clone(),
            TaskKind::Trim,
            TaskStatus::InProgress,
        ))
        .await?;

    let scratch = config.scratch_dir()?;
    let source = scratch.path().join("source");
    services
        .blobs
        .download_to(&config.buckets.static_assets, &req.video_key, &source)
        .await?;

    let mime = sniff_file(&source)
        .await?
        .ok_or_else(|| PipelineError::UnsupportedFormat(req.video_key.clone()))?;
    let probe = services.media.probe(&source).await?;
    let keep_alpha = VideoFileType::from_key(&req.video_key) == Some(VideoFileType::WebmVp9);
    let video_type = VideoFileType::for_source(mime, probe.codec.as_deref(), keep_alpha)?;
    debug!(key = %req.key, mime, ?video_type, start = window.start, end = window.end, "trimming");

    let output = scratch.path().join(format!("trimmed.{}", video_type.extension()));
    services
        .media
        .encode(
            &source,
            &trim_args(probe.width, probe.height, &window, video_type),
            &output,
        )
        .await?;
    let trimmed = services.media.probe(&output).await?;

    let canonical = canonical_key(&req.key, video_type.extension());
    services
        .blobs
        .upload_file(&config.buckets.static_assets, &canonical, &output, video_type.mime())
        .await?;

    let original = Media::video(MediaTag::Original, public_url(&config.static_url_base, &canonical))
        .with_duration(trimmed.duration);
    services
        .store
        .update_answer_and_task_status(
            AnswerUpdate::new(req.key.clone()).media(original.clone()),
            TaskStatusUpdate::task(req.key.clone(), TaskKind::Trim, TaskStatus::Done)
                .with_media(original),
        )
        .await?;

    info!(key = %req.key, duration = trimmed.duration, %canonical, "trim complete");
    Ok(StageReport::Completed {
        outputs: vec![canonical],
    })
}
