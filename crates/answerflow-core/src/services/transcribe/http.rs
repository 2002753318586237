//! Transcription against an OpenAI-compatible `/v1/audio/transcriptions`
//! endpoint. The request runs in a background task; its output lands in
//! the blob store exactly where a managed transcription service would put
//! it, followed by one object-created event per artifact.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};

use super::{JobHandle, TranscribeError, TranscriptDocument, TranscriptionEngine, TranscriptionJob};
use crate::layout::{TRANSCRIBE_AUDIO, TRANSCRIBE_JSON, TRANSCRIBE_VTT};
use crate::runtime::events::{PipelineEvent, StorageEvent};
use crate::services::blob::BlobStore;
use crate::subtitle::{Segment, VTT_CONTENT_TYPE, segments_to_vtt};

#[derive(Debug, Clone)]
pub struct HttpTranscriberConfig {
    /// Base url; `/v1/audio/transcriptions` is appended.
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Clone)]
pub struct HttpTranscriber {
    client: Client,
    config: Arc<HttpTranscriberConfig>,
    blobs: Arc<dyn BlobStore>,
    events: mpsc::Sender<PipelineEvent>,
}

impl std::fmt::Debug for HttpTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTranscriber")
            .field("endpoint", &self.config.endpoint)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

/// `verbose_json` response body.
#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<Segment>,
}

impl HttpTranscriber {
    pub fn new(
        config: HttpTranscriberConfig,
        blobs: Arc<dyn BlobStore>,
        events: mpsc::Sender<PipelineEvent>,
    ) -> Self {
        let client = Client::builder()
            .user_agent(concat!("answerflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            config: Arc::new(config),
            blobs,
            events,
        }
    }

    async fn transcribe(&self, audio: Bytes, language: &str) -> Result<VerboseTranscription, TranscribeError> {
        let url = format!(
            "{}/v1/audio/transcriptions",
            self.config.endpoint.trim_end_matches('/')
        );
        let part = Part::bytes(audio.to_vec())
            .file_name(TRANSCRIBE_AUDIO)
            .mime_str("audio/mpeg")?;
        let form = Form::new()
            .text("model", self.config.model.clone())
            .text("language", language.to_owned())
            .text("response_format", "verbose_json")
            .part("file", part);

        let mut request = self.client.post(&url).multipart(form);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn emit(&self, event: PipelineEvent) {
        if self.events.send(event).await.is_err() {
            warn!("event router gone; dropping transcription event");
        }
    }

    async fn put_artifact(
        &self,
        job: &TranscriptionJob,
        file: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), TranscribeError> {
        let key = format!("{}/{file}", job.output_prefix);
        self.blobs
            .put_object(&job.output_bucket, &key, body, content_type)
            .await?;
        self.emit(PipelineEvent::ObjectCreated(StorageEvent {
            bucket: job.output_bucket.clone(),
            key,
        }))
        .await;
        Ok(())
    }

    async fn run(&self, job: &TranscriptionJob) -> Result<(), TranscribeError> {
        let audio = self.blobs.get_object(&job.audio_bucket, &job.audio_key).await?;
        let result = self.transcribe(audio, &job.language).await?;
        let transcript = result.text.trim();
        info!(chars = transcript.len(), segments = result.segments.len(), "transcription finished");

        let document = TranscriptDocument::from_text(transcript);
        self.put_artifact(
            job,
            TRANSCRIBE_JSON,
            Bytes::from(serde_json::to_vec(&document)?),
            "application/json",
        )
        .await?;

        // No speech, no subtitles.
        if !transcript.is_empty() {
            let vtt = segments_to_vtt(&result.segments);
            self.put_artifact(job, TRANSCRIBE_VTT, Bytes::from(vtt), VTT_CONTENT_TYPE)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TranscriptionEngine for HttpTranscriber {
    async fn start_job(&self, job: TranscriptionJob) -> Result<JobHandle, TranscribeError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!(
            "transcription_job",
            job_id = %job_id,
            key = %job.key,
            task_id = %job.task_id,
        );
        debug!(parent: &span, audio_key = %job.audio_key, "starting transcription job");

        let engine = self.clone();
        tokio::spawn(
            async move {
                if let Err(e) = engine.run(&job).await {
                    warn!(error = %e, "transcription job failed");
                    engine
                        .emit(PipelineEvent::TranscriptionFailed {
                            key: job.key.clone(),
                            task_id: job.task_id.clone(),
                            correlation_id: job.correlation_id.clone(),
                            message: e.to_string(),
                        })
                        .await;
                }
            }
            .instrument(span),
        );
        Ok(JobHandle { job_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::types::SubmissionKey;
    use crate::testing::MemoryBlobStore;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job() -> TranscriptionJob {
        TranscriptionJob {
            correlation_id: "corr-1".into(),
            key: SubmissionKey::new("m", "q"),
            task_id: "t-1".into(),
            audio_bucket: "transcribe-input".into(),
            audio_key: "m/q/t-1/answer.mp3".into(),
            output_bucket: "transcribe-output".into(),
            output_prefix: "m/q/t-1".into(),
            language: "en".into(),
        }
    }

    async fn setup(server: &MockServer) -> (HttpTranscriber, Arc<MemoryBlobStore>, mpsc::Receiver<PipelineEvent>) {
        let blobs = Arc::new(MemoryBlobStore::default());
        blobs
            .put_object("transcribe-input", "m/q/t-1/answer.mp3", Bytes::from_static(b"ID3"), "audio/mpeg")
            .await
            .expect("seed audio");
        let (tx, rx) = mpsc::channel(8);
        let transcriber = HttpTranscriber::new(
            HttpTranscriberConfig {
                endpoint: server.uri(),
                model: "whisper-1".into(),
                api_key: Some("sk-test".into()),
            },
            blobs.clone(),
            tx,
        );
        (transcriber, blobs, rx)
    }

    #[tokio::test]
    async fn writes_both_artifacts_and_emits_events() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": " hello world ",
                "segments": [{ "start": 0.0, "end": 1.5, "text": "hello world" }]
            })))
            .mount(&server)
            .await;
        let (transcriber, blobs, mut rx) = setup(&server).await;

        transcriber.start_job(job()).await.expect("start");

        let mut keys = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.expect("event") {
                PipelineEvent::ObjectCreated(event) => keys.push(event.key),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(keys, ["m/q/t-1/transcribe.json", "m/q/t-1/transcribe.vtt"]);

        let json = blobs.get_object("transcribe-output", "m/q/t-1/transcribe.json").await.expect("json");
        let doc: TranscriptDocument = serde_json::from_slice(&json).expect("doc");
        assert_eq!(doc.transcript(), "hello world");
        let vtt = blobs.get_object("transcribe-output", "m/q/t-1/transcribe.vtt").await.expect("vtt");
        assert!(String::from_utf8_lossy(&vtt).contains("00:00:00.000 --> 00:00:01.500"));
    }

    #[tokio::test]
    async fn silent_audio_writes_only_the_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "", "segments": [] })))
            .mount(&server)
            .await;
        let (transcriber, blobs, mut rx) = setup(&server).await;

        transcriber.start_job(job()).await.expect("start");
        assert!(matches!(rx.recv().await, Some(PipelineEvent::ObjectCreated(_))));
        drop(transcriber);
        assert!(rx.recv().await.is_none());
        assert!(!blobs.exists("transcribe-output", "m/q/t-1/transcribe.vtt").await.expect("exists"));
    }

    #[tokio::test]
    async fn service_errors_become_failure_events() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let (transcriber, _blobs, mut rx) = setup(&server).await;

        transcriber.start_job(job()).await.expect("start");
        match rx.recv().await.expect("event") {
            PipelineEvent::TranscriptionFailed { correlation_id, message, .. } => {
                assert_eq!(correlation_id, "corr-1");
                assert!(message.contains("500"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
