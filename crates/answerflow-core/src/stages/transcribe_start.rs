//! First half of transcription: extract the audio, hand it to the
//! transcription engine and suspend on a correlation id.

use tracing::info;

use super::{StageReport, precondition, settle};
use crate::layout::{TRANSCRIBE_AUDIO, transcribe_input_key, transcribe_prefix};
use crate::runtime::context::Services;
use crate::runtime::error::PipelineError;
use crate::runtime::types::{StageRequest, TaskKind, TaskStatus};
use crate::services::store::TaskStatusUpdate;
use crate::services::transcribe::TranscriptionJob;

pub async fn run(services: &Services, req: &StageRequest) -> Result<StageReport, PipelineError> {
    if let Err(report) = precondition(services, req).await? {
        return Ok(report);
    }
    let result = start(services, req).await;
    settle(services, req, result).await
}

/// Mark done without a transcript field, so any stored transcript survives.
async fn finish_without_transcript(services: &Services, req: &StageRequest) -> Result<StageReport, PipelineError> {
    services
        .store
        .update_task_status(TaskStatusUpdate::task(
            req.key.clone(),
            TaskKind::Transcribe,
            TaskStatus::Done,
        ))
        .await?;
    Ok(StageReport::Completed { outputs: Vec::new() })
}

async fn start(services: &Services, req: &StageRequest) -> Result<StageReport, PipelineError> {
    let config = &services.config;

    if services
        .store
        .is_idle_question(&req.key.question, &config.idle_question_name)
        .await?
    {
        info!(key = %req.key, "idle question; nothing to transcribe");
        return finish_without_transcript(services, req).await;
    }

    let scratch = config.scratch_dir()?;
    let source = scratch.path().join("source");
    services
        .blobs
        .download_to(&config.buckets.static_assets, &req.video_key, &source)
        .await?;
    let probe = services.media.probe(&source).await?;
    if !probe.has_audio {
        info!(key = %req.key, "no audio track; keeping stored transcript");
        return finish_without_transcript(services, req).await;
    }

    let audio = scratch.path().join(TRANSCRIBE_AUDIO);
    services.media.extract_audio(&source, &audio).await?;
    let audio_key = transcribe_input_key(&req.key, &req.task.id);
    services
        .blobs
        .upload_file(&config.buckets.transcribe_input, &audio_key, &audio, "audio/mpeg")
        .await?;

    // Recorded before the job starts so a fast completion always finds it.
    let correlation_id = uuid::Uuid::new_v4().to_string();
    services
        .store
        .update_task_status(
            TaskStatusUpdate::task(req.key.clone(), TaskKind::Transcribe, TaskStatus::InProgress)
                .with_payload(&correlation_id),
        )
        .await?;

    let handle = services
        .transcriber
        .start_job(TranscriptionJob {
            correlation_id: correlation_id.clone(),
            key: req.key.clone(),
            task_id: req.task.id.clone(),
            audio_bucket: config.buckets.transcribe_input.clone(),
            audio_key,
            output_bucket: config.buckets.transcribe_output.clone(),
            output_prefix: transcribe_prefix(&req.key, &req.task.id),
            language: config.transcribe_language.clone(),
        })
        .await?;

    info!(
        key = %req.key,
        task_id = %req.task.id,
        job_id = %handle.job_id,
        %correlation_id,
        "transcription started"
    );
    Ok(StageReport::Suspended { correlation_id })
}
