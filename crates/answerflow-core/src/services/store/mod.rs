//! Content/status store client.
//!
//! Every write is sparse: a `None` field is left untouched by the store,
//! never cleared.

pub mod graphql;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mentor::MentorImage;
use crate::runtime::types::{
    Media, MediaTag, SubmissionKey, TaskKind, TaskSet, TaskStatus, WorkflowStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store answered {status}: {body}")]
    Status { status: u16, body: String },

    /// The store answered with an `errors` field.
    #[error("store rejected request: {0}")]
    Rejected(String),

    #[error("malformed store response: {0}")]
    Decode(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// User-visible answer record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub has_edited_transcript: bool,
    #[serde(default)]
    pub media: Vec<Media>,
}

impl Answer {
    pub fn media(&self, tag: MediaTag) -> Option<&Media> {
        self.media.iter().find(|m| m.tag == tag)
    }
}

/// Sparse mutation of the answer record.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerUpdate {
    pub key: SubmissionKey,
    pub transcript: Option<String>,
    pub has_edited_transcript: Option<bool>,
    /// Replaces the listed tags only; other slots are kept.
    pub media: Vec<Media>,
}

impl AnswerUpdate {
    pub fn new(key: SubmissionKey) -> Self {
        Self {
            key,
            transcript: None,
            has_edited_transcript: None,
            media: Vec::new(),
        }
    }

    pub fn transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    pub fn has_edited_transcript(mut self, edited: bool) -> Self {
        self.has_edited_transcript = Some(edited);
        self
    }

    pub fn media(mut self, media: Media) -> Self {
        self.media.push(media);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_none() && self.has_edited_transcript.is_none() && self.media.is_empty()
    }
}

/// Sparse mutation of one task's status, of the umbrella status, or both,
/// together with the media and transcript recorded on the task set.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusUpdate {
    pub key: SubmissionKey,
    pub kind: Option<TaskKind>,
    pub status: Option<TaskStatus>,
    pub payload: Option<String>,
    pub workflow: Option<WorkflowStatus>,
    pub transcript: Option<String>,
    pub media: Vec<Media>,
}

impl TaskStatusUpdate {
    pub fn task(key: SubmissionKey, kind: TaskKind, status: TaskStatus) -> Self {
        Self {
            kind: Some(kind),
            status: Some(status),
            ..Self::empty(key)
        }
    }

    pub fn workflow(key: SubmissionKey, status: WorkflowStatus) -> Self {
        Self {
            workflow: Some(status),
            ..Self::empty(key)
        }
    }

    fn empty(key: SubmissionKey) -> Self {
        Self {
            key,
            kind: None,
            status: None,
            payload: None,
            workflow: None,
            transcript: None,
            media: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_workflow(mut self, status: WorkflowStatus) -> Self {
        self.workflow = Some(status);
        self
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = Some(transcript.into());
        self
    }

    pub fn with_media(mut self, media: Media) -> Self {
        self.media.push(media);
        self
    }
}

/// Read/write access to task sets and answers.
///
/// A missing task set is `Ok(None)`: the client deleted it after an earlier
/// failure. Transport errors and store-side rejections are `Err` and are
/// fatal to the calling stage.
#[async_trait]
pub trait StatusStore: Send + Sync + 'static {
    async fn fetch_task_set(&self, key: &SubmissionKey) -> Result<Option<TaskSet>, StoreError>;

    async fn fetch_question_attribute(
        &self,
        question: &str,
        attribute: &str,
    ) -> Result<Option<String>, StoreError>;

    async fn fetch_answer(&self, key: &SubmissionKey) -> Result<Option<Answer>, StoreError>;

    /// Replace any previous task set for the key and apply `answer` with it.
    async fn create_task_set(&self, answer: AnswerUpdate, set: &TaskSet) -> Result<(), StoreError>;

    async fn update_task_status(&self, update: TaskStatusUpdate) -> Result<(), StoreError>;

    /// Apply both mutations as one, so readers never see new media next to a
    /// stale status or the reverse.
    async fn update_answer_and_task_status(
        &self,
        answer: AnswerUpdate,
        status: TaskStatusUpdate,
    ) -> Result<(), StoreError>;

    async fn update_answer(&self, answer: AnswerUpdate) -> Result<(), StoreError>;

    /// Point the mentor's `image` at the object key `path`.
    async fn update_mentor_image(
        &self,
        mentor: &str,
        image: MentorImage,
        path: &str,
    ) -> Result<(), StoreError>;

    /// Write the umbrella status only.
    async fn update_workflow_status(
        &self,
        key: &SubmissionKey,
        status: WorkflowStatus,
    ) -> Result<(), StoreError> {
        self.update_task_status(TaskStatusUpdate::workflow(key.clone(), status))
            .await
    }

    async fn is_idle_question(&self, question: &str, idle_name: &str) -> Result<bool, StoreError> {
        let name = self.fetch_question_attribute(question, "name").await?;
        Ok(name.as_deref() == Some(idle_name))
    }
}

/// Replace entries of `current` by tag with those in `incoming`.
pub(crate) fn merge_media(current: &mut Vec<Media>, incoming: &[Media]) {
    for media in incoming {
        match current.iter_mut().find(|m| m.tag == media.tag) {
            Some(slot) => *slot = media.clone(),
            None => current.push(media.clone()),
        }
    }
}

/// Apply a status update to an in-memory task set, refusing to move a task
/// or the umbrella record out of a terminal state. Other fields still apply.
#[cfg_attr(not(any(test, feature = "testing")), allow(dead_code))]
pub(crate) fn apply_status_update(set: &mut TaskSet, update: &TaskStatusUpdate) {
    if let Some(kind) = update.kind {
        match set.task_mut(kind) {
            Some(task) => {
                if let Some(next) = &update.status {
                    if task.status.can_transition_to(next) {
                        task.status = next.clone();
                    } else {
                        tracing::warn!(
                            key = %update.key,
                            kind = %kind,
                            from = %task.status,
                            to = %next,
                            "refusing task status transition"
                        );
                    }
                }
                if update.payload.is_some() {
                    task.payload = update.payload.clone();
                }
            }
            None => tracing::warn!(key = %update.key, kind = %kind, "status update for unknown task"),
        }
    }
    if let Some(next) = update.workflow {
        if set.status.is_terminal() {
            tracing::warn!(key = %update.key, from = %set.status, to = %next, "umbrella status already final");
        } else {
            set.status = next;
        }
    }
    if update.transcript.is_some() {
        set.transcript = update.transcript.clone();
    }
    merge_media(&mut set.media, &update.media);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::Task;

    #[test]
    fn status_update_respects_terminal_states() {
        let key = SubmissionKey::new("m", "q");
        let mut set = TaskSet {
            mentor: "m".into(),
            question: "q".into(),
            status: WorkflowStatus::InProgress,
            tasks: vec![Task::queued(TaskKind::TranscodeWeb)],
            transcript: None,
            media: vec![],
        };
        apply_status_update(
            &mut set,
            &TaskStatusUpdate::task(key.clone(), TaskKind::TranscodeWeb, TaskStatus::Done)
                .with_media(Media::video(MediaTag::Web, "web.mp4")),
        );
        assert_eq!(set.tasks[0].status, TaskStatus::Done);

        apply_status_update(
            &mut set,
            &TaskStatusUpdate::task(key.clone(), TaskKind::TranscodeWeb, TaskStatus::InProgress),
        );
        assert_eq!(set.tasks[0].status, TaskStatus::Done);
        assert_eq!(set.media.len(), 1);

        apply_status_update(&mut set, &TaskStatusUpdate::workflow(key.clone(), WorkflowStatus::Done));
        apply_status_update(&mut set, &TaskStatusUpdate::workflow(key, WorkflowStatus::Failed));
        assert_eq!(set.status, WorkflowStatus::Done);
    }

    #[test]
    fn merge_is_last_writer_wins_per_tag() {
        let mut current = vec![
            Media::video(MediaTag::Web, "old-web"),
            Media::video(MediaTag::Mobile, "mobile"),
        ];
        merge_media(
            &mut current,
            &[Media::video(MediaTag::Web, "new-web"), Media::subtitles("en.vtt")],
        );
        assert_eq!(current.len(), 3);
        assert_eq!(current[0].url, "new-web");
        assert_eq!(current[1].url, "mobile");
        assert_eq!(current[2].tag, MediaTag::En);
    }

    #[test]
    fn builders_only_set_what_they_name() {
        let key = SubmissionKey::new("m", "q");
        let update = TaskStatusUpdate::task(key.clone(), TaskKind::Transcribe, TaskStatus::InProgress)
            .with_payload("corr-1");
        assert_eq!(update.workflow, None);
        assert_eq!(update.transcript, None);
        assert_eq!(update.payload.as_deref(), Some("corr-1"));

        let answer = AnswerUpdate::new(key);
        assert!(answer.is_empty());
        assert!(!answer.transcript("").is_empty());
    }
}
