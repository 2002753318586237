use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, watch};

use crate::runtime::error::PipelineError;
use crate::runtime::types::SubmissionKey;

/// Where a live workflow is. Only this process knows; the status store
/// holds per-task progress.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowPhase {
    /// Accepted, waiting for a free workflow slot.
    Queued,
    Trimming,
    /// Renditions and transcription running side by side.
    Processing,
    /// Every stage returned; closing the umbrella record.
    Finalizing,
    /// Cancel was signalled; stages are winding down.
    Cancelling,
}

/// In-process record of a workflow this process is driving.
#[derive(Debug)]
pub struct WorkflowRecord {
    pub phase: WorkflowPhase,
    pub started_at: DateTime<Utc>,
    /// Flipped to `true` when the submission is cancelled.
    pub cancel_tx: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowView {
    pub key: SubmissionKey,
    pub phase: WorkflowPhase,
    pub started_at: DateTime<Utc>,
}

/// Thread-safe map of live workflows keyed by (mentor, question).
///
/// Holding a record is the in-process half of the one-live-submission
/// rule; the status store's task set is the durable half.
#[derive(Debug, Clone, Default)]
pub struct WorkflowStorage {
    inner: Arc<RwLock<HashMap<SubmissionKey, WorkflowRecord>>>,
}

impl WorkflowStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `key`, failing with `Conflict` while another workflow holds it.
    pub async fn claim(&self, key: &SubmissionKey) -> Result<(), PipelineError> {
        let mut guard = self.inner.write().await;
        if guard.contains_key(key) {
            return Err(PipelineError::Conflict(key.to_string()));
        }
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        guard.insert(
            key.clone(),
            WorkflowRecord {
                phase: WorkflowPhase::Queued,
                started_at: Utc::now(),
                cancel_tx: Arc::new(cancel_tx),
            },
        );
        Ok(())
    }

    /// Cancellation receiver for `key`, claiming it first if nobody holds it.
    pub async fn subscribe_or_claim(&self, key: &SubmissionKey) -> watch::Receiver<bool> {
        let mut guard = self.inner.write().await;
        let record = guard.entry(key.clone()).or_insert_with(|| WorkflowRecord {
            phase: WorkflowPhase::Queued,
            started_at: Utc::now(),
            cancel_tx: Arc::new(watch::channel(false).0),
        });
        record.cancel_tx.subscribe()
    }

    pub async fn release(&self, key: &SubmissionKey) {
        self.inner.write().await.remove(key);
    }

    /// Advance a live workflow. A cancelled workflow stays `Cancelling`.
    pub async fn set_phase(&self, key: &SubmissionKey, phase: WorkflowPhase) {
        if let Some(record) = self.inner.write().await.get_mut(key) {
            if record.phase != WorkflowPhase::Cancelling {
                record.phase = phase;
            }
        }
    }

    pub async fn cancel_tx(&self, key: &SubmissionKey) -> Option<Arc<watch::Sender<bool>>> {
        self.inner
            .read()
            .await
            .get(key)
            .map(|r| Arc::clone(&r.cancel_tx))
    }

    pub async fn snapshot(&self, key: &SubmissionKey) -> Option<WorkflowView> {
        let guard = self.inner.read().await;
        let record = guard.get(key)?;
        Some(WorkflowView {
            key: key.clone(),
            phase: record.phase,
            started_at: record.started_at,
        })
    }

    pub async fn live(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn claim_is_exclusive_until_released() {
        let storage = WorkflowStorage::new();
        let key = SubmissionKey::new("m", "q");
        storage.claim(&key).await.expect("first claim");
        assert!(matches!(storage.claim(&key).await, Err(PipelineError::Conflict(_))));
        storage.release(&key).await;
        storage.claim(&key).await.expect("claim after release");
    }

    #[tokio::test]
    async fn cancel_signal_reaches_subscribers() {
        let storage = WorkflowStorage::new();
        let key = SubmissionKey::new("m", "q");
        storage.claim(&key).await.expect("claim");
        let mut rx = storage.subscribe_or_claim(&key).await;
        storage.cancel_tx(&key).await.expect("tx").send(true).expect("send");
        rx.changed().await.expect("changed");
        assert!(*rx.borrow());

        storage.release(&key).await;
        assert_eq!(storage.live().await, 0);
    }

    #[tokio::test]
    async fn phase_advances_until_cancelled() {
        let storage = WorkflowStorage::new();
        let key = SubmissionKey::new("m", "q");
        storage.set_phase(&key, WorkflowPhase::Trimming).await;
        assert!(storage.snapshot(&key).await.is_none());

        storage.claim(&key).await.expect("claim");
        assert_eq!(storage.snapshot(&key).await.expect("view").phase, WorkflowPhase::Queued);
        storage.set_phase(&key, WorkflowPhase::Processing).await;
        assert_eq!(storage.snapshot(&key).await.expect("view").phase, WorkflowPhase::Processing);

        storage.set_phase(&key, WorkflowPhase::Cancelling).await;
        storage.set_phase(&key, WorkflowPhase::Finalizing).await;
        let view = storage.snapshot(&key).await.expect("view");
        assert_eq!(view.phase, WorkflowPhase::Cancelling);
        assert_eq!(view.phase.to_string(), "CANCELLING");
    }
}
