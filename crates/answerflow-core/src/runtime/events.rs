//! Intake for asynchronous events: object-created notifications from blob
//! storage and failure reports from the transcription engine.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::layout::{TranscribeArtifact, parse_transcribe_output};
use crate::runtime::context::Services;
use crate::runtime::continuation::ContinuationOutcome;
use crate::runtime::error::PipelineError;
use crate::runtime::types::{SkipReason, SubmissionKey, TaskId, TaskKind};
use crate::stages::{self, StageReport};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEvent {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    ObjectCreated(StorageEvent),
    /// The engine gave up on a job and will write no artifacts.
    TranscriptionFailed {
        key: SubmissionKey,
        task_id: TaskId,
        correlation_id: String,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventRouter {
    services: Services,
}

impl EventRouter {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// The transcription artifact `event` announces, if any.
    pub fn classify(&self, event: &StorageEvent) -> Option<TranscribeArtifact> {
        if event.bucket != self.services.config.buckets.transcribe_output {
            return None;
        }
        parse_transcribe_output(&event.key)
    }

    /// Route one event. `Ok(None)` means nothing listens for it.
    pub async fn handle(&self, event: PipelineEvent) -> Result<Option<StageReport>, PipelineError> {
        match event {
            PipelineEvent::ObjectCreated(storage) => match self.classify(&storage) {
                Some(artifact) => stages::transcribe_collect::run(&self.services, &artifact)
                    .await
                    .map(Some),
                None => {
                    debug!(bucket = %storage.bucket, key = %storage.key, "ignoring object event");
                    Ok(None)
                }
            },
            PipelineEvent::TranscriptionFailed {
                key,
                task_id,
                correlation_id,
                message,
            } => self
                .transcription_failed(&key, &task_id, &correlation_id, message)
                .await
                .map(Some),
        }
    }

    async fn transcription_failed(
        &self,
        key: &SubmissionKey,
        task_id: &str,
        correlation_id: &str,
        message: String,
    ) -> Result<StageReport, PipelineError> {
        let set = self.services.store.fetch_task_set(key).await?;
        let live = set
            .as_ref()
            .and_then(|s| s.task(TaskKind::Transcribe))
            .filter(|t| t.id == task_id && !t.status.is_terminal());
        let report = match live {
            Some(_) => {
                stages::mark_task_failed(&self.services, key, TaskKind::Transcribe).await;
                StageReport::Completed { outputs: Vec::new() }
            }
            None => {
                info!(%key, task_id, "transcription failure for a task that is gone or finished");
                StageReport::Skipped(SkipReason::NotFound)
            }
        };
        self.services
            .continuations
            .resume(correlation_id, ContinuationOutcome::Failure(message));
        Ok(report)
    }

    /// Drain `rx` on a background task until every sender is gone.
    pub fn spawn(self, mut rx: mpsc::Receiver<PipelineEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = self.handle(event).await {
                    error!(error = %e, "event handling failed");
                }
            }
            debug!("event channel closed");
        })
    }
}
