//! Second half of transcription, driven by object-created events for the
//! job's output. The two artifacts arrive independently, so this runs once
//! per arrival and finishes only when everything it needs is present.

use bytes::Bytes;
use tracing::{info, warn};

use super::{StageReport, mark_task_failed};
use crate::layout::{TranscribeArtifact, vtt_key};
use crate::runtime::context::Services;
use crate::runtime::continuation::ContinuationOutcome;
use crate::runtime::error::PipelineError;
use crate::runtime::types::{Media, SkipReason, TaskKind, TaskStatus};
use crate::services::blob::BlobError;
use crate::services::store::{AnswerUpdate, TaskStatusUpdate};
use crate::services::transcribe::TranscriptDocument;
use crate::subtitle::VTT_CONTENT_TYPE;

fn skipped(artifact: &TranscribeArtifact, reason: SkipReason) -> StageReport {
    info!(
        key = %artifact.key,
        task_id = %artifact.task_id,
        %reason,
        "skipping transcription collect"
    );
    StageReport::Skipped(reason)
}

/// `Ok(None)` when the object is not there yet.
async fn optional_object(
    services: &Services,
    bucket: &str,
    key: &str,
) -> Result<Option<Bytes>, PipelineError> {
    match services.blobs.get_object(bucket, key).await {
        Ok(body) => Ok(Some(body)),
        Err(BlobError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn run(services: &Services, artifact: &TranscribeArtifact) -> Result<StageReport, PipelineError> {
    let Some(set) = services.store.fetch_task_set(&artifact.key).await? else {
        return Ok(skipped(artifact, SkipReason::NotFound));
    };
    let Some(task) = set.task(TaskKind::Transcribe) else {
        return Ok(skipped(artifact, SkipReason::NotRequested));
    };
    if task.id != artifact.task_id {
        return Ok(skipped(artifact, SkipReason::NotFound));
    }
    let correlation_id = task.payload.clone();
    if task.status.is_cancelled() {
        // Let a suspended workflow move on; it will observe the cancellation.
        if let Some(id) = &correlation_id {
            services.continuations.resume(id, ContinuationOutcome::Success);
        }
        return Ok(skipped(artifact, SkipReason::Cancelled));
    }
    if task.status.is_terminal() {
        return Ok(skipped(artifact, SkipReason::AlreadyFinished));
    }

    match collect(services, artifact).await {
        Ok(StageReport::Skipped(reason)) => Ok(skipped(artifact, reason)),
        Ok(report) => {
            if let Some(id) = &correlation_id {
                services.continuations.resume(id, ContinuationOutcome::Success);
            }
            Ok(report)
        }
        Err(e) => {
            warn!(key = %artifact.key, task_id = %artifact.task_id, error = %e, "transcription collect failed");
            mark_task_failed(services, &artifact.key, TaskKind::Transcribe).await;
            // An explicit failure, so the waiting workflow does not sit out its timeout.
            if let Some(id) = &correlation_id {
                services
                    .continuations
                    .resume(id, ContinuationOutcome::Failure(e.to_string()));
            }
            Err(e)
        }
    }
}

async fn collect(services: &Services, artifact: &TranscribeArtifact) -> Result<StageReport, PipelineError> {
    let buckets = &services.config.buckets;
    let Some(json) = optional_object(services, &buckets.transcribe_output, &artifact.json_key()).await?
    else {
        return Ok(StageReport::Skipped(SkipReason::ArtifactMissing));
    };
    let document: TranscriptDocument = serde_json::from_slice(&json)?;
    let transcript = document.transcript();

    let done = TaskStatusUpdate::task(artifact.key.clone(), TaskKind::Transcribe, TaskStatus::Done)
        .with_transcript(transcript);
    let answer = AnswerUpdate::new(artifact.key.clone()).transcript(transcript);

    // No speech: the service writes no subtitles, so do not wait for them.
    if transcript.is_empty() {
        services
            .store
            .update_answer_and_task_status(answer, done)
            .await?;
        info!(key = %artifact.key, "transcription complete; no speech");
        return Ok(StageReport::Completed { outputs: Vec::new() });
    }

    let Some(vtt) = optional_object(services, &buckets.transcribe_output, &artifact.vtt_key()).await?
    else {
        return Ok(StageReport::Skipped(SkipReason::ArtifactMissing));
    };
    let object = vtt_key(&artifact.key);
    services
        .blobs
        .put_object(&buckets.static_assets, &object, vtt, VTT_CONTENT_TYPE)
        .await?;
    let subtitles = Media::subtitles(&object);
    services
        .store
        .update_answer_and_task_status(answer.media(subtitles.clone()), done.with_media(subtitles))
        .await?;

    info!(key = %artifact.key, chars = transcript.len(), "transcription complete");
    Ok(StageReport::Completed {
        outputs: vec![object],
    })
}
