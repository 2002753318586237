use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::runtime::error::PipelineError;

/// Opaque identifier of a single task inside a task set.
pub type TaskId = String;

/// The four units of work a submission can fan out into.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    #[serde(rename = "trim-upload")]
    Trim,
    #[serde(rename = "transcoding-web")]
    TranscodeWeb,
    #[serde(rename = "transcoding-mobile")]
    TranscodeMobile,
    #[serde(rename = "transcribing")]
    Transcribe,
}

impl TaskKind {
    pub const ALL: [TaskKind; 4] = [
        TaskKind::Trim,
        TaskKind::TranscodeWeb,
        TaskKind::TranscodeMobile,
        TaskKind::Transcribe,
    ];

    /// Name stored alongside the task id in the content store.
    pub fn task_name(self) -> &'static str {
        match self {
            TaskKind::Trim => "trim-upload",
            TaskKind::TranscodeWeb => "transcoding-web",
            TaskKind::TranscodeMobile => "transcoding-mobile",
            TaskKind::Transcribe => "transcribing",
        }
    }

    /// Field holding this task inside the content store's upload-task record.
    pub fn field_name(self) -> &'static str {
        match self {
            TaskKind::Trim => "trimUploadTask",
            TaskKind::TranscodeWeb => "transcodeWebTask",
            TaskKind::TranscodeMobile => "transcodeMobileTask",
            TaskKind::Transcribe => "transcribeTask",
        }
    }

    pub fn from_task_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.task_name() == name)
    }
}

/// Status of one task.
///
/// Any status whose string form starts with `CANCEL` is a cancellation,
/// whatever the rest of the string says; the raw value is kept so it can
/// be written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Done,
    Failed,
    Cancelled(String),
}

pub const CANCEL_PREFIX: &str = "CANCEL";

impl TaskStatus {
    pub fn cancelled() -> Self {
        TaskStatus::Cancelled("CANCELLED".to_owned())
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled(raw) => raw,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskStatus::Cancelled(_))
    }

    /// `true` once the task can no longer be advanced by a stage handler.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled(_)
        )
    }

    /// Forward-only transition rule. Terminal states never move again and
    /// nothing returns to `QUEUED`.
    pub fn can_transition_to(&self, next: &TaskStatus) -> bool {
        match self {
            s if s.is_terminal() => false,
            TaskStatus::Queued => true,
            TaskStatus::InProgress => !matches!(next, TaskStatus::Queued),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(CANCEL_PREFIX) {
            return Ok(TaskStatus::Cancelled(s.to_owned()));
        }
        match s {
            "QUEUED" => Ok(TaskStatus::Queued),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "DONE" => Ok(TaskStatus::Done),
            "FAILED" => Ok(TaskStatus::Failed),
            other => Err(PipelineError::Validation(format!(
                "unknown task status '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TaskStatus> for String {
    fn from(value: TaskStatus) -> Self {
        value.as_str().to_owned()
    }
}

/// Workflow-wide terminal signal, kept apart from every per-stage status.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    InProgress,
    Done,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkflowStatus::InProgress)
    }
}

// ── Media ─────────────────────────────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaType {
    Video,
    Subtitles,
    Image,
}

/// Slot a media entry occupies on the answer record. One stage owns each slot.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaTag {
    Original,
    Web,
    Mobile,
    En,
}

impl MediaTag {
    pub fn field_name(self) -> &'static str {
        match self {
            MediaTag::Original => "originalMedia",
            MediaTag::Web => "webMedia",
            MediaTag::Mobile => "mobileMedia",
            MediaTag::En => "vttMedia",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub tag: MediaTag,
    pub url: String,
    #[serde(default)]
    pub needs_transfer: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transparent_video_url: Option<String>,
}

impl Media {
    pub fn video(tag: MediaTag, url: impl Into<String>) -> Self {
        Self {
            media_type: MediaType::Video,
            tag,
            url: url.into(),
            needs_transfer: false,
            duration: None,
            hash: None,
            transparent_video_url: None,
        }
    }

    pub fn subtitles(url: impl Into<String>) -> Self {
        Self {
            media_type: MediaType::Subtitles,
            ..Self::video(MediaTag::En, url)
        }
    }

    /// Entry that clears a slot: same type and tag, empty url.
    pub fn blank(media_type: MediaType, tag: MediaTag) -> Self {
        Self {
            media_type,
            ..Self::video(tag, "")
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_transparent_video_url(mut self, url: impl Into<String>) -> Self {
        self.transparent_video_url = Some(url.into());
        self
    }

    pub fn is_blank(&self) -> bool {
        self.url.is_empty()
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "task_id")]
    pub id: TaskId,
    #[serde(rename = "task_name")]
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Correlation id of a suspended asynchronous job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
}

impl Task {
    pub fn queued(kind: TaskKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            status: TaskStatus::Queued,
            payload: None,
            transcript: None,
            media: None,
        }
    }

    pub fn descriptor(&self) -> TaskDescriptor {
        TaskDescriptor {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status.clone(),
        }
    }
}

/// The minimum a stage needs to know about the task it works on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
}

/// Every task spawned by one submission, plus the answer fields they write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSet {
    pub mentor: String,
    pub question: String,
    pub status: WorkflowStatus,
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default)]
    pub media: Vec<Media>,
}

impl TaskSet {
    pub fn task(&self, kind: TaskKind) -> Option<&Task> {
        self.tasks.iter().find(|t| t.kind == kind)
    }

    pub fn task_mut(&mut self, kind: TaskKind) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.kind == kind)
    }

    pub fn media(&self, tag: MediaTag) -> Option<&Media> {
        self.media.iter().find(|m| m.tag == tag)
    }

    /// A set stops blocking new submissions once the umbrella record is
    /// terminal or every task it owns is.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal() || self.tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn key(&self) -> SubmissionKey {
        SubmissionKey::new(&self.mentor, &self.question)
    }
}

// ── Submissions ───────────────────────────────────────────────────────────────

/// Identity of a submission. At most one live task set exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionKey {
    pub mentor: String,
    pub question: String,
}

impl SubmissionKey {
    pub fn new(mentor: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            mentor: mentor.into(),
            question: question.into(),
        }
    }
}

impl fmt::Display for SubmissionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.mentor, self.question)
    }
}

/// Trim window in seconds from the start of the source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimWindow {
    pub start: f64,
    pub end: f64,
}

impl TrimWindow {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Payload threaded through the orchestrator and stage handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub key: SubmissionKey,
    /// Canonical object key in the static bucket.
    pub video_key: String,
    pub trim: Option<TrimWindow>,
    pub maintain_original_aspect_ratio: bool,
}

/// Request handed to one stage handler.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRequest {
    pub key: SubmissionKey,
    pub video_key: String,
    pub task: TaskDescriptor,
    pub trim: Option<TrimWindow>,
    pub maintain_original_aspect_ratio: bool,
}

impl StageRequest {
    pub fn new(submission: &Submission, task: TaskDescriptor) -> Self {
        Self {
            key: submission.key.clone(),
            video_key: submission.video_key.clone(),
            task,
            trim: submission.trim,
            maintain_original_aspect_ratio: submission.maintain_original_aspect_ratio,
        }
    }
}

// ── Video containers ──────────────────────────────────────────────────────────

/// Supported output containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFileType {
    Mp4,
    WebmVp9,
}

impl VideoFileType {
    pub fn mime(self) -> &'static str {
        match self {
            VideoFileType::Mp4 => "video/mp4",
            VideoFileType::WebmVp9 => "video/webm",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            VideoFileType::Mp4 => "mp4",
            VideoFileType::WebmVp9 => "webm",
        }
    }

    pub fn required_codec(self) -> Option<&'static str> {
        match self {
            VideoFileType::Mp4 => None,
            VideoFileType::WebmVp9 => Some("vp9"),
        }
    }

    /// Re-derive the type from an object key written by this pipeline.
    pub fn from_key(key: &str) -> Option<Self> {
        let ext = key.rsplit_once('.')?.1;
        match ext.to_ascii_lowercase().as_str() {
            "mp4" => Some(VideoFileType::Mp4),
            "webm" => Some(VideoFileType::WebmVp9),
            _ => None,
        }
    }

    /// Choose the output container for sniffed content.
    ///
    /// Only VP9 webm with the virtual-background flag keeps its container,
    /// since that is the one case where an alpha channel must survive.
    /// Everything else supported is normalised to mp4.
    pub fn for_source(
        mime: &str,
        codec: Option<&str>,
        virtual_background: bool,
    ) -> Result<Self, PipelineError> {
        match mime {
            "video/webm" => {
                let is_vp9 = codec.is_some_and(|c| {
                    Some(c) == VideoFileType::WebmVp9.required_codec()
                });
                if virtual_background && is_vp9 {
                    Ok(VideoFileType::WebmVp9)
                } else {
                    Ok(VideoFileType::Mp4)
                }
            }
            "video/mp4" | "video/x-matroska" | "video/quicktime" => Ok(VideoFileType::Mp4),
            other => Err(PipelineError::UnsupportedFormat(other.to_owned())),
        }
    }
}

// ── Precondition outcomes ─────────────────────────────────────────────────────

/// Why a stage decided there was nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// The task set was deleted client-side after an earlier failure.
    NotFound,
    Cancelled,
    AlreadyFinished,
    NotRequested,
    /// One of two asynchronous artifacts has not arrived yet.
    ArtifactMissing,
}

/// Result of a precondition check, consumed with an explicit `match`.
#[derive(Debug)]
pub enum Outcome<T> {
    Proceed(T),
    Skip(SkipReason),
    Fail(PipelineError),
}

impl<T> Outcome<T> {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Outcome::Proceed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_prefix_is_matched_loosely() {
        for raw in ["CANCEL", "CANCELLED", "CANCEL_REQUESTED", "CANCELING"] {
            let status: TaskStatus = raw.parse().expect("parse");
            assert!(status.is_cancelled(), "{raw} should count as cancelled");
            assert_eq!(status.as_str(), raw);
        }
        assert!("cancelled".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn terminal_states_never_transition() {
        let terminal = [TaskStatus::Done, TaskStatus::Failed, TaskStatus::cancelled()];
        let all = [
            TaskStatus::Queued,
            TaskStatus::InProgress,
            TaskStatus::Done,
            TaskStatus::Failed,
            TaskStatus::cancelled(),
        ];
        for from in &terminal {
            for to in &all {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        assert!(TaskStatus::Queued.can_transition_to(&TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(&TaskStatus::Done));
        assert!(!TaskStatus::InProgress.can_transition_to(&TaskStatus::Queued));
    }

    #[test]
    fn task_serializes_with_store_field_names() {
        let task = Task {
            id: "t-1".into(),
            kind: TaskKind::TranscodeWeb,
            status: TaskStatus::InProgress,
            payload: None,
            transcript: None,
            media: None,
        };
        let json = serde_json::to_value(&task).expect("serialize");
        assert_eq!(json["task_id"], "t-1");
        assert_eq!(json["task_name"], "transcoding-web");
        assert_eq!(json["status"], "IN_PROGRESS");
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn media_uses_camel_case() {
        let media = Media::video(MediaTag::Web, "videos/m/q/web.mp4")
            .with_transparent_video_url("videos/m/q/web.webm");
        let json = serde_json::to_value(&media).expect("serialize");
        assert_eq!(json["type"], "video");
        assert_eq!(json["tag"], "web");
        assert_eq!(json["needsTransfer"], false);
        assert_eq!(json["transparentVideoUrl"], "videos/m/q/web.webm");
    }

    #[test]
    fn task_set_terminal_when_umbrella_or_all_tasks_finish() {
        let mut set = TaskSet {
            mentor: "m".into(),
            question: "q".into(),
            status: WorkflowStatus::InProgress,
            tasks: vec![Task::queued(TaskKind::TranscodeWeb), Task::queued(TaskKind::Transcribe)],
            transcript: None,
            media: vec![],
        };
        assert!(!set.is_terminal());
        for task in &mut set.tasks {
            task.status = TaskStatus::Done;
        }
        assert!(set.is_terminal());
        set.tasks[0].status = TaskStatus::InProgress;
        set.status = WorkflowStatus::Failed;
        assert!(set.is_terminal());
    }

    #[test]
    fn video_type_selection() {
        assert_eq!(
            VideoFileType::for_source("video/webm", Some("vp9"), true).unwrap(),
            VideoFileType::WebmVp9
        );
        assert_eq!(
            VideoFileType::for_source("video/webm", Some("vp9"), false).unwrap(),
            VideoFileType::Mp4
        );
        assert_eq!(
            VideoFileType::for_source("video/webm", Some("vp8"), true).unwrap(),
            VideoFileType::Mp4
        );
        assert!(matches!(
            VideoFileType::for_source("image/png", None, false),
            Err(PipelineError::UnsupportedFormat(_))
        ));
        assert_eq!(
            VideoFileType::from_key("videos/m/q/original.webm"),
            Some(VideoFileType::WebmVp9)
        );
        assert_eq!(VideoFileType::from_key("videos/m/q/original"), None);
    }
}
