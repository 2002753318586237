//! Ingestion pipeline for recorded video answers.
//!
//! An upload is normalised into a canonical original, then fanned out into
//! a web rendition, a mobile rendition and a transcription, with every
//! step's progress recorded on the answer's task set.

pub mod config;
pub mod layout;
pub mod mentor;
pub mod runtime;
pub mod services;
pub mod stages;
pub mod subtitle;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{Buckets, PipelineConfig};
pub use mentor::{MentorImage, MentorImageReceipt, MentorImageUpload, upload_image};
pub use runtime::context::Services;
pub use runtime::error::PipelineError;
pub use runtime::events::{EventRouter, PipelineEvent, StorageEvent};
pub use runtime::orchestrator::Orchestrator;
pub use runtime::storage::{WorkflowPhase, WorkflowView};
pub use runtime::submission::{
    SubmissionReceipt, UploadRequest, UploadUrl, UploadUrlRequest, presign_upload, submit,
};
pub use runtime::types::{
    Media, MediaTag, SubmissionKey, Task, TaskKind, TaskSet, TaskStatus, TrimWindow, WorkflowStatus,
};
