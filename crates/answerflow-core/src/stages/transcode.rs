//! Web and mobile renditions. Both run the same steps and differ only in
//! the geometry they compute.

use std::path::Path;

use tracing::{debug, info};

use super::{StageReport, precondition, settle, sha1_file};
use crate::config::PipelineConfig;
use crate::layout::rendition_key;
use crate::runtime::context::Services;
use crate::runtime::error::PipelineError;
use crate::runtime::types::{
    Media, MediaTag, StageRequest, TaskKind, TaskStatus, VideoFileType,
};
use crate::services::media::ProbeInfo;
use crate::services::media::profile::{Geometry, mobile_geometry, transcode_args, web_geometry};
use crate::services::store::{AnswerUpdate, TaskStatusUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Rendition {
    Web,
    Mobile,
}

impl Rendition {
    pub fn kind(self) -> TaskKind {
        match self {
            Rendition::Web => TaskKind::TranscodeWeb,
            Rendition::Mobile => TaskKind::TranscodeMobile,
        }
    }

    pub fn tag(self) -> MediaTag {
        match self {
            Rendition::Web => MediaTag::Web,
            Rendition::Mobile => MediaTag::Mobile,
        }
    }

    /// File stem of every object this rendition writes.
    pub fn stem(self) -> &'static str {
        match self {
            Rendition::Web => "web",
            Rendition::Mobile => "mobile",
        }
    }

    pub fn from_kind(kind: TaskKind) -> Option<Self> {
        match kind {
            TaskKind::TranscodeWeb => Some(Rendition::Web),
            TaskKind::TranscodeMobile => Some(Rendition::Mobile),
            _ => None,
        }
    }

    pub fn geometry(self, probe: &ProbeInfo, config: &PipelineConfig, maintain_aspect: bool) -> Geometry {
        match self {
            Rendition::Web => web_geometry(probe.width, probe.height, &config.web, maintain_aspect),
            Rendition::Mobile => {
                mobile_geometry(probe.width, probe.height, &config.mobile, maintain_aspect)
            }
        }
    }
}

pub async fn run(
    services: &Services,
    req: &StageRequest,
    rendition: Rendition,
) -> Result<StageReport, PipelineError> {
    if let Err(report) = precondition(services, req).await? {
        return Ok(report);
    }
    let result = transcode(services, req, rendition).await;
    settle(services, req, result).await
}

async fn upload(
    services: &Services,
    key: &str,
    path: &Path,
    content_type: &str,
) -> Result<(), PipelineError> {
    services
        .blobs
        .upload_file(&services.config.buckets.static_assets, key, path, content_type)
        .await?;
    debug!(object = key, content_type, "rendition uploaded");
    Ok(())
}

async fn transcode(
    services: &Services,
    req: &StageRequest,
    rendition: Rendition,
) -> Result<StageReport, PipelineError> {
    let config = &services.config;
    let video_type = VideoFileType::from_key(&req.video_key)
        .ok_or_else(|| PipelineError::UnsupportedFormat(req.video_key.clone()))?;

    services
        .store
        .update_task_status(TaskStatusUpdate::task(
            req.key.clone(),
            rendition.kind(),
            TaskStatus::InProgress,
        ))
        .await?;

    let scratch = config.scratch_dir()?;
    let source = scratch.path().join(format!("source.{}", video_type.extension()));
    services
        .blobs
        .download_to(&config.buckets.static_assets, &req.video_key, &source)
        .await?;
    let probe = services.media.probe(&source).await?;

    let geometry = rendition.geometry(&probe, config, req.maintain_original_aspect_ratio);
    let args = transcode_args(&geometry, video_type);
    let primary = scratch
        .path()
        .join(format!("{}.{}", rendition.stem(), video_type.extension()));
    services.media.encode(&source, &args, &primary).await?;

    let primary_key = rendition_key(&req.key, rendition.stem(), video_type.extension());
    upload(services, &primary_key, &primary, video_type.mime()).await?;
    let mut outputs = vec![primary_key.clone()];

    let media = match video_type {
        VideoFileType::Mp4 => Media::video(rendition.tag(), &primary_key),
        // Not every player handles webm, so an mp4 copy is always published.
        VideoFileType::WebmVp9 => {
            let mp4 = VideoFileType::Mp4;
            let copy = scratch.path().join(format!("{}.{}", rendition.stem(), mp4.extension()));
            services.media.remux(&primary, &copy).await?;
            let copy_key = rendition_key(&req.key, rendition.stem(), mp4.extension());
            upload(services, &copy_key, &copy, mp4.mime()).await?;
            outputs.push(copy_key.clone());
            Media::video(rendition.tag(), copy_key).with_transparent_video_url(&primary_key)
        }
    };
    let media = media
        .with_duration(probe.duration)
        .with_hash(sha1_file(&source).await?);

    services
        .store
        .update_answer_and_task_status(
            AnswerUpdate::new(req.key.clone()).media(media.clone()),
            TaskStatusUpdate::task(req.key.clone(), rendition.kind(), TaskStatus::Done)
                .with_media(media),
        )
        .await?;

    info!(
        key = %req.key,
        %rendition,
        width = geometry.out_w,
        height = geometry.out_h,
        outputs = outputs.len(),
        "rendition complete"
    );
    Ok(StageReport::Completed { outputs })
}
