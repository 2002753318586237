//! Entry point for a fresh upload: validate it, make it the canonical
//! original, create the task set and hand it to the orchestrator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::layout::{canonical_key, public_url, stale_keys, upload_object_key};
use crate::runtime::context::Services;
use crate::runtime::error::PipelineError;
use crate::runtime::orchestrator::Orchestrator;
use crate::runtime::types::{
    Media, MediaTag, MediaType, Submission, SubmissionKey, Task, TaskDescriptor, TaskKind, TaskSet,
    TrimWindow, VideoFileType, WorkflowStatus,
};
use crate::services::media::{MediaError, profile, sniff_file};
use crate::services::store::AnswerUpdate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub mentor: String,
    pub question: String,
    /// Object key of the raw upload in the upload bucket.
    pub upload_key: String,
    #[serde(default)]
    pub trim: Option<TrimWindow>,
    /// The user edited the transcript by hand; do not transcribe again.
    #[serde(default)]
    pub has_edited_transcript: bool,
    #[serde(default)]
    pub virtual_background: bool,
    #[serde(default)]
    pub maintain_original_aspect_ratio: bool,
}

impl UploadRequest {
    pub fn key(&self) -> SubmissionKey {
        SubmissionKey::new(&self.mentor, &self.question)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        for (field, value) in [
            ("mentor", &self.mentor),
            ("question", &self.question),
            ("uploadKey", &self.upload_key),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::Validation(format!("{field} is required")));
            }
        }
        for (field, value) in [("mentor", &self.mentor), ("question", &self.question)] {
            if value.contains('/') {
                return Err(PipelineError::Validation(format!(
                    "{field} must not contain '/'"
                )));
            }
        }
        if let Some(trim) = self.trim {
            if !trim.start.is_finite() || !trim.end.is_finite() || trim.start < 0.0 || trim.end <= trim.start {
                return Err(PipelineError::Validation(format!(
                    "invalid trim window {}..{}",
                    trim.start, trim.end
                )));
            }
        }
        Ok(())
    }
}

/// Ask for a url the client can put a raw upload to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlRequest {
    /// Owner of the upload; the first segment of the object key.
    pub uploader: String,
    /// Exact size in bytes of the file that will be put.
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrl {
    /// Key to pass as `uploadKey` once the put succeeded.
    pub key: String,
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub expires_in_secs: u64,
    pub max_bytes: u64,
}

/// Sign a one-off upload of `size` bytes to a fresh key in the upload
/// bucket.
pub async fn presign_upload(services: &Services, request: UploadUrlRequest) -> Result<UploadUrl, PipelineError> {
    let config = &services.config;
    let uploader = request.uploader.trim();
    if uploader.is_empty() || uploader.contains('/') {
        return Err(PipelineError::Validation(
            "uploader is required and must not contain '/'".to_owned(),
        ));
    }
    if request.size == 0 || request.size > config.max_upload_bytes {
        return Err(PipelineError::Validation(format!(
            "size must be between 1 and {} bytes",
            config.max_upload_bytes
        )));
    }
    let content_type = request
        .content_type
        .as_deref()
        .filter(|ct| !ct.trim().is_empty())
        .unwrap_or("application/octet-stream");

    let key = upload_object_key(uploader, Uuid::new_v4());
    let ttl = config.upload_url_ttl();
    let signed = services
        .blobs
        .presign_put(&config.buckets.upload, &key, content_type, request.size, ttl)
        .await?;
    info!(uploader, %key, size = request.size, "upload url issued");
    Ok(UploadUrl {
        key,
        url: signed.url,
        method: signed.method,
        headers: signed.headers,
        expires_in_secs: ttl.as_secs(),
        max_bytes: config.max_upload_bytes,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub key: SubmissionKey,
    pub tasks: Vec<TaskDescriptor>,
    pub status_url: String,
}

/// Accept an upload and queue its workflow.
///
/// Returns once the task set exists and the workflow is queued; the stages
/// run in the background. Rejections leave every store untouched apart
/// from the scratch directory.
pub async fn submit(
    orchestrator: &Orchestrator,
    request: UploadRequest,
) -> Result<SubmissionReceipt, PipelineError> {
    request.validate()?;
    let key = request.key();
    orchestrator.storage().claim(&key).await?;

    match accept(orchestrator, &key, &request).await {
        Ok(receipt) => Ok(receipt),
        Err(e) => {
            orchestrator.storage().release(&key).await;
            if e.is_rejection() {
                warn!(%key, error = %e, "upload rejected");
            } else {
                error!(%key, error = %e, "upload failed");
            }
            Err(e)
        }
    }
}

async fn accept(
    orchestrator: &Orchestrator,
    key: &SubmissionKey,
    request: &UploadRequest,
) -> Result<SubmissionReceipt, PipelineError> {
    let services = orchestrator.services();
    let config = &services.config;

    if let Some(set) = services.store.fetch_task_set(key).await? {
        if !set.is_terminal() {
            return Err(PipelineError::Conflict(key.to_string()));
        }
    }

    // ── Inspect the upload ──
    let scratch = config.scratch_dir()?;
    let upload = scratch.path().join("upload");
    services
        .blobs
        .download_to(&config.buckets.upload, &request.upload_key, &upload)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                PipelineError::NotFound(format!("upload {}", request.upload_key))
            } else {
                e.into()
            }
        })?;

    let mime = sniff_file(&upload)
        .await?
        .ok_or_else(|| PipelineError::UnsupportedFormat("unrecognised content".to_owned()))?;
    // Container check first, so non-video content never reaches the prober.
    VideoFileType::for_source(mime, None, false)?;

    let probe = services.media.probe(&upload).await.map_err(|e| match e {
        MediaError::NoVideoStream(_) => PipelineError::Validation("upload has no video stream".to_owned()),
        other => other.into(),
    })?;
    if probe.duration_ms() < config.min_video_duration_ms {
        return Err(PipelineError::Validation(format!(
            "video is {} ms long; the minimum is {} ms",
            probe.duration_ms(),
            config.min_video_duration_ms
        )));
    }
    let video_type = VideoFileType::for_source(mime, probe.codec.as_deref(), request.virtual_background)?;

    // The canonical key's extension must always describe its bytes.
    let canonical_file = if mime == video_type.mime() {
        upload
    } else {
        let out = scratch.path().join(format!("canonical.{}", video_type.extension()));
        let args = profile::reencode_args(probe.width, probe.height, video_type);
        services.media.encode(&upload, &args, &out).await?;
        info!(%key, from = mime, to = video_type.mime(), "normalised upload container");
        out
    };

    // ── Replace previous artifacts ──
    // Blank the slots before deleting, so nobody follows a dangling url.
    services
        .store
        .update_answer(
            AnswerUpdate::new(key.clone())
                .media(Media::blank(MediaType::Video, MediaTag::Web))
                .media(Media::blank(MediaType::Video, MediaTag::Mobile))
                .media(Media::blank(MediaType::Subtitles, MediaTag::En)),
        )
        .await?;
    services
        .blobs
        .delete_objects(&config.buckets.static_assets, &stale_keys(key))
        .await?;

    let video_key = canonical_key(key, video_type.extension());
    services
        .blobs
        .upload_file(&config.buckets.static_assets, &video_key, &canonical_file, video_type.mime())
        .await?;

    // ── Task set ──
    let skip_transcription = request.has_edited_transcript;
    let mut tasks = Vec::with_capacity(4);
    if request.trim.is_some() {
        tasks.push(Task::queued(TaskKind::Trim));
    }
    tasks.push(Task::queued(TaskKind::TranscodeWeb));
    tasks.push(Task::queued(TaskKind::TranscodeMobile));
    if !skip_transcription {
        tasks.push(Task::queued(TaskKind::Transcribe));
    }

    let original = Media::video(MediaTag::Original, public_url(&config.static_url_base, &video_key))
        .with_duration(probe.duration);
    let set = TaskSet {
        mentor: key.mentor.clone(),
        question: key.question.clone(),
        status: WorkflowStatus::InProgress,
        tasks,
        transcript: (!skip_transcription).then(String::new),
        media: vec![original.clone()],
    };
    let mut answer = AnswerUpdate::new(key.clone()).media(original);
    if !skip_transcription {
        answer = answer.transcript("");
    }
    services.store.create_task_set(answer, &set).await?;

    let submission = Submission {
        key: key.clone(),
        video_key,
        trim: request.trim,
        maintain_original_aspect_ratio: request.maintain_original_aspect_ratio,
    };
    if let Err(e) = orchestrator.dispatch(submission) {
        if let Err(write) = services
            .store
            .update_workflow_status(key, WorkflowStatus::Failed)
            .await
        {
            error!(%key, error = %write, "could not record dispatch failure");
        }
        return Err(e);
    }

    let tasks: Vec<TaskDescriptor> = set.tasks.iter().map(Task::descriptor).collect();
    info!(
        %key,
        video_type = video_type.extension(),
        duration_s = probe.duration,
        tasks = tasks.len(),
        "upload accepted"
    );
    Ok(SubmissionReceipt {
        status_url: format!("/v1/answers/{}/{}/status", key.mentor, key.question),
        key: key.clone(),
        tasks,
    })
}
