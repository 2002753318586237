use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::runtime::context::Services;
use crate::runtime::continuation::ContinuationOutcome;
use crate::runtime::error::PipelineError;
use crate::runtime::storage::{WorkflowPhase, WorkflowStorage};
use crate::runtime::types::{
    StageRequest, Submission, SubmissionKey, TaskKind, TaskSet, TaskStatus, WorkflowStatus,
};
use crate::services::store::TaskStatusUpdate;
use crate::stages::transcode::Rendition;
use crate::stages::{self, StageReport};

/// Commands sent to the orchestrator's internal event loop.
#[derive(Debug)]
pub enum OrchestratorCommand {
    /// Drive a submission whose task set has been created.
    Submit { submission: Submission },
    /// Wake every step of a live workflow that is waiting on something.
    Cancel { key: SubmissionKey },
}

/// Sequences the stages of each submission over its task set.
///
/// Trim runs first because every other stage reads the object it rewrites.
/// Web, mobile and transcription then run concurrently. Any stage error
/// fails the umbrella record; nothing is retried automatically.
///
/// ```rust,ignore
/// let orchestrator = Orchestrator::start(services, 64, 4);
/// orchestrator.dispatch(submission)?;
/// ```
#[derive(Clone, Debug)]
pub struct Orchestrator {
    services: Services,
    storage: WorkflowStorage,
    submit_tx: mpsc::Sender<OrchestratorCommand>,
    capacity: usize,
}

impl Orchestrator {
    /// Spawn the command loop.
    ///
    /// * `queue_capacity` – pending submissions before `dispatch` reports `QueueFull`.
    /// * `max_concurrent` – workflows driven at once; the rest wait for a permit.
    pub fn start(services: Services, queue_capacity: usize, max_concurrent: usize) -> Self {
        let capacity = queue_capacity.max(1);
        let (submit_tx, submit_rx) = mpsc::channel::<OrchestratorCommand>(capacity);
        let storage = WorkflowStorage::new();
        let limiter = Arc::new(Semaphore::new(max_concurrent.max(1)));

        tokio::spawn(Self::run_loop(
            submit_rx,
            services.clone(),
            storage.clone(),
            limiter,
        ));

        Self {
            services,
            storage,
            submit_tx,
            capacity,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn storage(&self) -> &WorkflowStorage {
        &self.storage
    }

    async fn run_loop(
        mut rx: mpsc::Receiver<OrchestratorCommand>,
        services: Services,
        storage: WorkflowStorage,
        limiter: Arc<Semaphore>,
    ) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                OrchestratorCommand::Submit { submission } => {
                    let services = services.clone();
                    let storage = storage.clone();
                    let limiter = Arc::clone(&limiter);
                    tokio::spawn(async move {
                        let Ok(_permit) = limiter.acquire_owned().await else {
                            return;
                        };
                        // Failures are logged and recorded inside.
                        let _ = Self::drive(&services, &storage, submission).await;
                    });
                }

                OrchestratorCommand::Cancel { key } => match storage.cancel_tx(&key).await {
                    Some(tx) => {
                        storage.set_phase(&key, WorkflowPhase::Cancelling).await;
                        tx.send_replace(true);
                        info!(%key, "cancellation signalled");
                    }
                    None => debug!(%key, "cancel: no live workflow"),
                },
            }
        }
        info!("orchestrator loop stopped");
    }

    /// Queue a submission without waiting for it to run.
    pub fn dispatch(&self, submission: Submission) -> Result<(), PipelineError> {
        self.submit_tx
            .try_send(OrchestratorCommand::Submit { submission })
            .map_err(|e| match e {
                TrySendError::Full(_) => PipelineError::QueueFull {
                    capacity: self.capacity,
                },
                TrySendError::Closed(_) => PipelineError::Shutdown,
            })
    }

    /// Drive a submission on the calling task. `Ok(None)` when the task set
    /// disappeared underneath the workflow.
    pub async fn run(&self, submission: Submission) -> Result<Option<WorkflowStatus>, PipelineError> {
        Self::drive(&self.services, &self.storage, submission).await
    }

    /// Cancel every unfinished task of `key` and the umbrella record, then
    /// wake the live workflow, if any. Returns the task set as stored after
    /// the cancellation.
    pub async fn cancel(&self, key: &SubmissionKey) -> Result<TaskSet, PipelineError> {
        let store = &self.services.store;
        let set = store
            .fetch_task_set(key)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("task set {key}")))?;

        for task in set.tasks.iter().filter(|t| !t.status.is_terminal()) {
            store
                .update_task_status(TaskStatusUpdate::task(
                    key.clone(),
                    task.kind,
                    TaskStatus::cancelled(),
                ))
                .await?;
        }
        if !set.status.is_terminal() {
            store
                .update_workflow_status(key, WorkflowStatus::Cancelled)
                .await?;
        }

        self.submit_tx
            .send(OrchestratorCommand::Cancel { key: key.clone() })
            .await
            .map_err(|_| PipelineError::Shutdown)?;
        info!(%key, "submission cancelled");

        store
            .fetch_task_set(key)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("task set {key}")))
    }

    async fn drive(
        services: &Services,
        storage: &WorkflowStorage,
        submission: Submission,
    ) -> Result<Option<WorkflowStatus>, PipelineError> {
        let key = submission.key.clone();
        let span = info_span!("workflow", mentor = %key.mentor, question = %key.question);

        async move {
            let started = Instant::now();
            let cancel_rx = storage.subscribe_or_claim(&key).await;

            let result = async {
                if !Self::execute(services, storage, submission, cancel_rx.clone()).await? {
                    return Ok(None);
                }
                storage.set_phase(&key, WorkflowPhase::Finalizing).await;
                Self::finalize(services, &key, &cancel_rx).await
            }
            .await;

            let result = match result {
                Ok(status) => Ok(status),
                Err(e) => {
                    error!(error = %e, "workflow failed");
                    if let Err(write) = services
                        .store
                        .update_workflow_status(&key, WorkflowStatus::Failed)
                        .await
                    {
                        error!(error = %write, "could not record workflow failure");
                    }
                    Err(e)
                }
            };

            let status = match &result {
                Ok(Some(status)) => Some(*status),
                Ok(None) => None,
                Err(_) => Some(WorkflowStatus::Failed),
            };
            storage.release(&key).await;
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                status = ?status,
                "workflow finished"
            );
            result
        }
        .instrument(span)
        .await
    }

    /// Run every requested stage. `false` when the task set is gone.
    async fn execute(
        services: &Services,
        storage: &WorkflowStorage,
        mut submission: Submission,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<bool, PipelineError> {
        let Some(set) = services.store.fetch_task_set(&submission.key).await? else {
            info!("task set gone before the workflow started");
            return Ok(false);
        };
        if *cancel_rx.borrow() {
            return Ok(true);
        }

        if let Some(req) = stage_request(&set, &submission, TaskKind::Trim) {
            storage.set_phase(&req.key, WorkflowPhase::Trimming).await;
            if let StageReport::Completed { outputs } = stages::trim::run(services, &req).await? {
                if let Some(canonical) = outputs.into_iter().next() {
                    submission.video_key = canonical;
                }
            }
        }
        if *cancel_rx.borrow() {
            return Ok(true);
        }

        storage
            .set_phase(&submission.key, WorkflowPhase::Processing)
            .await;

        // Raised by a failed transcode so a suspended transcription stops waiting.
        let (abort_tx, abort_rx) = watch::channel(false);
        let (web, mobile, transcribe) = tokio::join!(
            Self::transcode_branch(
                services,
                stage_request(&set, &submission, TaskKind::TranscodeWeb),
                Rendition::Web,
                &abort_tx,
            ),
            Self::transcode_branch(
                services,
                stage_request(&set, &submission, TaskKind::TranscodeMobile),
                Rendition::Mobile,
                &abort_tx,
            ),
            Self::transcribe_branch(
                services,
                stage_request(&set, &submission, TaskKind::Transcribe),
                cancel_rx.clone(),
                abort_rx,
            ),
        );
        web?;
        mobile?;
        transcribe?;
        Ok(true)
    }

    async fn transcode_branch(
        services: &Services,
        req: Option<StageRequest>,
        rendition: Rendition,
        abort: &watch::Sender<bool>,
    ) -> Result<(), PipelineError> {
        let Some(req) = req else {
            return Ok(());
        };
        match stages::transcode::run(services, &req, rendition).await {
            Ok(_) => Ok(()),
            Err(e) => {
                abort.send_replace(true);
                Err(e)
            }
        }
    }

    async fn transcribe_branch(
        services: &Services,
        req: Option<StageRequest>,
        cancel_rx: watch::Receiver<bool>,
        abort_rx: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        let Some(req) = req else {
            return Ok(());
        };
        let StageReport::Suspended { correlation_id } =
            stages::transcribe_start::run(services, &req).await?
        else {
            return Ok(());
        };

        let continuation = services.continuations.register(&correlation_id);
        let timeout = services.config.transcribe_timeout();
        tokio::select! {
            outcome = continuation.wait() => match outcome {
                Some(ContinuationOutcome::Success) => Ok(()),
                Some(ContinuationOutcome::Failure(message)) => {
                    Err(PipelineError::TranscriptionFailed(message))
                }
                None => Err(PipelineError::Shutdown),
            },
            () = tokio::time::sleep(timeout) => {
                services.continuations.abandon(&correlation_id);
                warn!(%correlation_id, timeout_secs = timeout.as_secs(), "transcription never completed");
                stages::mark_task_failed(services, &req.key, TaskKind::Transcribe).await;
                Err(PipelineError::Timeout(format!("transcription of {}", req.key)))
            },
            () = signalled(cancel_rx) => {
                services.continuations.abandon(&correlation_id);
                info!(%correlation_id, "cancelled while waiting for transcription");
                Ok(())
            },
            () = signalled(abort_rx) => {
                services.continuations.abandon(&correlation_id);
                info!(%correlation_id, "another stage failed; no longer waiting for transcription");
                Ok(())
            },
        }
    }

    /// Close the umbrella record once every stage has returned.
    async fn finalize(
        services: &Services,
        key: &SubmissionKey,
        cancel_rx: &watch::Receiver<bool>,
    ) -> Result<Option<WorkflowStatus>, PipelineError> {
        let Some(set) = services.store.fetch_task_set(key).await? else {
            info!("task set removed while the workflow ran");
            return Ok(None);
        };
        if set.status.is_terminal() {
            return Ok(Some(set.status));
        }
        let cancelled = *cancel_rx.borrow() || set.tasks.iter().any(|t| t.status.is_cancelled());
        let status = if cancelled {
            WorkflowStatus::Cancelled
        } else {
            WorkflowStatus::Done
        };
        services.store.update_workflow_status(key, status).await?;
        Ok(Some(status))
    }
}

fn stage_request(set: &TaskSet, submission: &Submission, kind: TaskKind) -> Option<StageRequest> {
    set.task(kind)
        .map(|task| StageRequest::new(submission, task.descriptor()))
}

/// Resolves once `rx` reads `true`. Never resolves if the sender is gone.
async fn signalled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|v| *v).await.is_err() {
        std::future::pending::<()>().await;
    }
}
