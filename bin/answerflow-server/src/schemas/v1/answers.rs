use answerflow_core::stages::subtitles::VttReceipt;
use std::collections::BTreeMap;

use answerflow_core::{
    Media, SubmissionReceipt, Task, TaskSet, TrimWindow, UploadRequest, UploadUrl, UploadUrlRequest,
    WorkflowView,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadAnswerRequest {
    pub mentor: String,
    pub question: String,
    /// Object key of the raw upload in the upload bucket.
    pub upload_key: String,
    /// Keep only this window of the upload, in seconds.
    #[serde(default)]
    pub trim: Option<TrimRange>,
    /// The transcript was edited by hand; skip transcription.
    #[serde(default)]
    pub has_edited_transcript: bool,
    /// The upload has an alpha channel that must survive transcoding.
    #[serde(default)]
    pub virtual_background: bool,
    #[serde(default)]
    pub maintain_original_aspect_ratio: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct TrimRange {
    pub start: f64,
    pub end: f64,
}

impl From<UploadAnswerRequest> for UploadRequest {
    fn from(req: UploadAnswerRequest) -> Self {
        UploadRequest {
            mentor: req.mentor,
            question: req.question,
            upload_key: req.upload_key,
            trim: req.trim.map(|t| TrimWindow {
                start: t.start,
                end: t.end,
            }),
            has_edited_transcript: req.has_edited_transcript,
            virtual_background: req.virtual_background,
            maintain_original_aspect_ratio: req.maintain_original_aspect_ratio,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlBody {
    /// Owner of the upload, usually the mentor id.
    pub uploader: String,
    /// Exact size in bytes of the file that will be uploaded.
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
}

impl From<UploadUrlBody> for UploadUrlRequest {
    fn from(body: UploadUrlBody) -> Self {
        UploadUrlRequest {
            uploader: body.uploader,
            size: body.size,
            content_type: body.content_type,
        }
    }
}

/// Where and how to put the raw upload. Pass `key` as `uploadKey` afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadUrlResponse {
    pub key: String,
    pub url: String,
    pub method: String,
    /// Send these headers unchanged with the upload.
    pub headers: BTreeMap<String, String>,
    pub expires_in_secs: u64,
    pub max_bytes: u64,
}

impl From<UploadUrl> for UploadUrlResponse {
    fn from(signed: UploadUrl) -> Self {
        UploadUrlResponse {
            key: signed.key,
            url: signed.url,
            method: signed.method,
            headers: signed.headers,
            expires_in_secs: signed.expires_in_secs,
            max_bytes: signed.max_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub task_id: String,
    pub task_name: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub mentor: String,
    pub question: String,
    pub tasks: Vec<TaskSummary>,
    /// Poll this for progress.
    pub status_url: String,
}

impl From<SubmissionReceipt> for SubmissionResponse {
    fn from(receipt: SubmissionReceipt) -> Self {
        SubmissionResponse {
            mentor: receipt.key.mentor,
            question: receipt.key.question,
            tasks: receipt
                .tasks
                .into_iter()
                .map(|t| TaskSummary {
                    task_id: t.id,
                    task_name: t.kind.task_name().to_owned(),
                    status: t.status.to_string(),
                })
                .collect(),
            status_url: receipt.status_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MediaResponse {
    #[serde(rename = "type")]
    pub media_type: String,
    pub tag: String,
    pub url: String,
    pub needs_transfer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transparent_video_url: Option<String>,
}

impl From<Media> for MediaResponse {
    fn from(m: Media) -> Self {
        MediaResponse {
            media_type: m.media_type.to_string(),
            tag: m.tag.to_string(),
            url: m.url,
            needs_transfer: m.needs_transfer,
            duration: m.duration,
            hash: m.hash,
            transparent_video_url: m.transparent_video_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub task_id: String,
    pub task_name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaResponse>,
}

impl From<Task> for TaskResponse {
    fn from(t: Task) -> Self {
        TaskResponse {
            task_id: t.id,
            task_name: t.kind.task_name().to_owned(),
            status: t.status.to_string(),
            payload: t.payload,
            transcript: t.transcript,
            media: t.media.map(MediaResponse::from),
        }
    }
}

/// Workflow this server process is currently driving.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveWorkflow {
    /// `QUEUED`, `TRIMMING`, `PROCESSING`, `FINALIZING` or `CANCELLING`.
    pub phase: String,
    /// RFC 3339 timestamp.
    pub started_at: String,
}

impl From<WorkflowView> for LiveWorkflow {
    fn from(view: WorkflowView) -> Self {
        LiveWorkflow {
            phase: view.phase.to_string(),
            started_at: view.started_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskSetResponse {
    pub mentor: String,
    pub question: String,
    /// Umbrella status: `IN_PROGRESS`, `DONE`, `FAILED` or `CANCELLED`.
    pub status: String,
    pub tasks: Vec<TaskResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    pub media: Vec<MediaResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<LiveWorkflow>,
}

impl TaskSetResponse {
    pub fn new(set: TaskSet, live: Option<WorkflowView>) -> Self {
        TaskSetResponse {
            mentor: set.mentor,
            question: set.question,
            status: set.status.to_string(),
            tasks: set.tasks.into_iter().map(TaskResponse::from).collect(),
            transcript: set.transcript,
            media: set.media.into_iter().map(MediaResponse::from).collect(),
            live: live.map(LiveWorkflow::from),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VttResponse {
    /// Object key of the subtitle track in the static bucket.
    pub key: String,
    pub url: String,
    pub text: String,
}

impl From<VttReceipt> for VttResponse {
    fn from(r: VttReceipt) -> Self {
        VttResponse {
            key: r.key,
            url: r.url,
            text: r.text,
        }
    }
}
