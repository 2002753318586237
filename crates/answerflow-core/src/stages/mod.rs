//! Stage handlers.
//!
//! Every handler follows the same shape: a precondition check that may
//! skip the stage without side effects, the work itself, and a failure
//! boundary that marks the handler's own task `FAILED` before re-raising
//! so the orchestrator can also fail the umbrella record.

pub mod subtitles;
pub mod transcode;
pub mod transcribe_collect;
pub mod transcribe_start;
pub mod trim;

use std::path::Path;

use sha1::{Digest, Sha1};
use tracing::{error, info, warn};

use crate::runtime::context::Services;
use crate::runtime::error::PipelineError;
use crate::runtime::types::{
    Outcome, SkipReason, StageRequest, SubmissionKey, TaskKind, TaskSet, TaskStatus,
};
use crate::services::store::{StatusStore, TaskStatusUpdate};

/// What a stage invocation achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageReport {
    /// Keys of the objects the stage wrote.
    Completed { outputs: Vec<String> },
    /// Work continues elsewhere; resume with this correlation id.
    Suspended { correlation_id: String },
    Skipped(SkipReason),
}

/// Decide whether the stage described by `req` should run.
///
/// The descriptor's own status is consulted first so an already-cancelled
/// task never reaches the store.
pub async fn check_task(store: &dyn StatusStore, req: &StageRequest) -> Outcome<TaskSet> {
    if req.task.status.is_cancelled() {
        return Outcome::Skip(SkipReason::Cancelled);
    }
    let set = match store.fetch_task_set(&req.key).await {
        Ok(Some(set)) => set,
        Ok(None) => return Outcome::Skip(SkipReason::NotFound),
        Err(e) => return Outcome::Fail(e.into()),
    };
    let Some(task) = set.task(req.task.kind) else {
        return Outcome::Skip(SkipReason::NotRequested);
    };
    if task.id != req.task.id {
        // A newer submission replaced the set this request belongs to.
        return Outcome::Skip(SkipReason::NotFound);
    }
    if task.status.is_cancelled() {
        return Outcome::Skip(SkipReason::Cancelled);
    }
    if task.status.is_terminal() {
        return Outcome::Skip(SkipReason::AlreadyFinished);
    }
    Outcome::Proceed(set)
}

/// Run `check_task`, logging skips. An inner `Err` carries the report the
/// stage returns without doing anything.
pub(crate) async fn precondition(
    services: &Services,
    req: &StageRequest,
) -> Result<Result<TaskSet, StageReport>, PipelineError> {
    match check_task(&*services.store, req).await {
        Outcome::Proceed(set) => Ok(Ok(set)),
        Outcome::Skip(reason) => {
            info!(
                key = %req.key,
                kind = %req.task.kind,
                task_id = %req.task.id,
                %reason,
                "skipping stage"
            );
            Ok(Err(StageReport::Skipped(reason)))
        }
        Outcome::Fail(e) => Err(e),
    }
}

/// Best-effort `FAILED` write for one task. A failure here is logged and
/// otherwise ignored so the original error is the one that propagates.
pub(crate) async fn mark_task_failed(services: &Services, key: &SubmissionKey, kind: TaskKind) {
    let update = TaskStatusUpdate::task(key.clone(), kind, TaskStatus::Failed);
    if let Err(e) = services.store.update_task_status(update).await {
        error!(%key, %kind, error = %e, "could not record task failure");
    }
}

/// Failure boundary shared by every stage.
pub(crate) async fn settle(
    services: &Services,
    req: &StageRequest,
    result: Result<StageReport, PipelineError>,
) -> Result<StageReport, PipelineError> {
    match result {
        Ok(report) => Ok(report),
        Err(e) => {
            warn!(
                key = %req.key,
                kind = %req.task.kind,
                task_id = %req.task.id,
                error = %e,
                "stage failed"
            );
            mark_task_failed(services, &req.key, req.task.kind).await;
            Err(e)
        }
    }
}

pub(crate) async fn sha1_file(path: &Path) -> std::io::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha1::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::{Task, TaskDescriptor, WorkflowStatus};
    use crate::testing::MemoryStatusStore;

    fn request(task: &Task) -> StageRequest {
        StageRequest {
            key: SubmissionKey::new("m", "q"),
            video_key: "videos/m/q/original.mp4".into(),
            task: task.descriptor(),
            trim: None,
            maintain_original_aspect_ratio: false,
        }
    }

    fn set_with(task: Task) -> TaskSet {
        TaskSet {
            mentor: "m".into(),
            question: "q".into(),
            status: WorkflowStatus::InProgress,
            tasks: vec![task],
            transcript: None,
            media: vec![],
        }
    }

    #[tokio::test]
    async fn precondition_outcomes() {
        let store = MemoryStatusStore::default();
        let task = Task::queued(TaskKind::TranscodeWeb);
        let req = request(&task);
        assert!(matches!(
            check_task(&store, &req).await,
            Outcome::Skip(SkipReason::NotFound)
        ));

        store.insert_task_set(set_with(task.clone()));
        assert!(check_task(&store, &req).await.is_proceed());

        let other = StageRequest {
            task: TaskDescriptor {
                kind: TaskKind::Transcribe,
                ..task.descriptor()
            },
            ..req.clone()
        };
        assert!(matches!(
            check_task(&store, &other).await,
            Outcome::Skip(SkipReason::NotRequested)
        ));

        let stale = StageRequest {
            task: TaskDescriptor {
                id: "older".into(),
                ..task.descriptor()
            },
            ..req.clone()
        };
        assert!(matches!(
            check_task(&store, &stale).await,
            Outcome::Skip(SkipReason::NotFound)
        ));

        let mut cancelled = task.clone();
        cancelled.status = "CANCEL_REQUESTED".parse().expect("status");
        store.insert_task_set(set_with(cancelled));
        assert!(matches!(
            check_task(&store, &req).await,
            Outcome::Skip(SkipReason::Cancelled)
        ));

        let mut done = task;
        done.status = TaskStatus::Done;
        store.insert_task_set(set_with(done));
        assert!(matches!(
            check_task(&store, &req).await,
            Outcome::Skip(SkipReason::AlreadyFinished)
        ));
    }

    #[tokio::test]
    async fn store_errors_fail_the_check() {
        let store = MemoryStatusStore::default();
        store.fail_reads(true);
        let task = Task::queued(TaskKind::Trim);
        assert!(matches!(
            check_task(&store, &request(&task)).await,
            Outcome::Fail(PipelineError::Store(_))
        ));
    }
}
