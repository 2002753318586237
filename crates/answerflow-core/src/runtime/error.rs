use thiserror::Error;

use crate::services::blob::BlobError;
use crate::services::media::MediaError;
use crate::services::store::StoreError;
use crate::services::transcribe::TranscribeError;

/// Errors produced anywhere in the ingestion pipeline.
///
/// `Validation`, `UnsupportedFormat` and `Conflict` reject a submission up
/// front. The collaborator variants are fatal to the stage that hit them and
/// always reach the umbrella failure handler.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("upload in progress for {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("status store error: {0}")]
    Store(#[from] StoreError),

    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("media engine error: {0}")]
    Media(#[from] MediaError),

    #[error("transcription engine error: {0}")]
    Transcription(#[from] TranscribeError),

    /// The suspended transcription step was resumed with a failure signal.
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// The suspended transcription step was never resumed.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("orchestrator queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("orchestrator shut down")]
    Shutdown,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether the caller sent something the pipeline will never accept.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(_) | PipelineError::UnsupportedFormat(_)
        )
    }
}
