//! Speech transcription engine.
//!
//! A job is started and forgotten: the engine reports back only by writing
//! `transcribe.json` (and `transcribe.vtt` for non-empty speech) to the
//! output location, each write followed by an object-created event.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::types::{SubmissionKey, TaskId};
use crate::services::blob::BlobError;

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transcription service answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything an engine needs to run one job and place its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionJob {
    pub correlation_id: String,
    pub key: SubmissionKey,
    pub task_id: TaskId,
    pub audio_bucket: String,
    pub audio_key: String,
    pub output_bucket: String,
    /// `{mentor}/{question}/{task_id}`; artifacts are written below it.
    pub output_prefix: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
}

#[async_trait]
pub trait TranscriptionEngine: Send + Sync + 'static {
    async fn start_job(&self, job: TranscriptionJob) -> Result<JobHandle, TranscribeError>;
}

// ── Job result document ───────────────────────────────────────────────────────

/// Contents of `transcribe.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptDocument {
    pub results: TranscriptResults,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptResults {
    #[serde(default)]
    pub transcripts: Vec<TranscriptText>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptText {
    pub transcript: String,
}

impl TranscriptDocument {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            results: TranscriptResults {
                transcripts: vec![TranscriptText {
                    transcript: text.into(),
                }],
            },
        }
    }

    /// First transcript, or empty when the service heard nothing.
    pub fn transcript(&self) -> &str {
        self.results
            .transcripts
            .first()
            .map(|t| t.transcript.as_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_first_transcript() {
        let doc: TranscriptDocument = serde_json::from_str(
            r#"{"jobName":"x","results":{"transcripts":[{"transcript":"hello there"}],"items":[]}}"#,
        )
        .expect("parse");
        assert_eq!(doc.transcript(), "hello there");

        let empty: TranscriptDocument =
            serde_json::from_str(r#"{"results":{"transcripts":[]}}"#).expect("parse");
        assert_eq!(empty.transcript(), "");
    }
}
