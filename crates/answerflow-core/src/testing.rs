//! In-memory collaborators for tests.
//!
//! Media files produced by [`FakeMediaEngine`] are a real container magic
//! header (so content sniffing works) followed by the JSON of the
//! [`ProbeInfo`] they claim to have.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::layout::{TRANSCRIBE_JSON, TRANSCRIBE_VTT};
use crate::mentor::MentorImage;
use crate::runtime::context::Services;
use crate::runtime::events::{EventRouter, PipelineEvent, StorageEvent};
use crate::runtime::orchestrator::Orchestrator;
use crate::runtime::types::{SubmissionKey, TaskSet};
use crate::services::blob::{BlobError, BlobStore, PresignedUpload};
use crate::services::media::{EncodeArgs, MediaEngine, MediaError, ProbeInfo};
use crate::services::store::{
    Answer, AnswerUpdate, StatusStore, StoreError, TaskStatusUpdate, apply_status_update, merge_media,
};
use crate::services::transcribe::{
    JobHandle, TranscribeError, TranscriptDocument, TranscriptionEngine, TranscriptionJob,
};
use crate::subtitle::{Segment, VTT_CONTENT_TYPE, segments_to_vtt};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Status store ──────────────────────────────────────────────────────────────

/// One mutation received by [`MemoryStatusStore`], in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    CreateTaskSet(SubmissionKey),
    Status(TaskStatusUpdate),
    Answer(AnswerUpdate),
    Combined(AnswerUpdate, TaskStatusUpdate),
    MentorImage {
        mentor: String,
        image: MentorImage,
        path: String,
    },
}

#[derive(Debug, Default)]
struct StoreState {
    sets: HashMap<SubmissionKey, TaskSet>,
    answers: HashMap<SubmissionKey, Answer>,
    questions: HashMap<String, HashMap<String, String>>,
    mentor_images: HashMap<(String, MentorImage), String>,
    writes: Vec<StoreWrite>,
}

#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    state: Mutex<StoreState>,
    fail_reads: AtomicBool,
}

impl MemoryStatusStore {
    pub fn insert_task_set(&self, set: TaskSet) {
        lock(&self.state).sets.insert(set.key(), set);
    }

    pub fn remove_task_set(&self, key: &SubmissionKey) {
        lock(&self.state).sets.remove(key);
    }

    pub fn insert_answer(&self, key: SubmissionKey, answer: Answer) {
        lock(&self.state).answers.insert(key, answer);
    }

    pub fn set_question_attribute(&self, question: &str, attribute: &str, value: &str) {
        lock(&self.state)
            .questions
            .entry(question.to_owned())
            .or_default()
            .insert(attribute.to_owned(), value.to_owned());
    }

    pub fn task_set(&self, key: &SubmissionKey) -> Option<TaskSet> {
        lock(&self.state).sets.get(key).cloned()
    }

    pub fn answer(&self, key: &SubmissionKey) -> Option<Answer> {
        lock(&self.state).answers.get(key).cloned()
    }

    pub fn mentor_image(&self, mentor: &str, image: MentorImage) -> Option<String> {
        lock(&self.state)
            .mentor_images
            .get(&(mentor.to_owned(), image))
            .cloned()
    }

    pub fn writes(&self) -> Vec<StoreWrite> {
        lock(&self.state).writes.clone()
    }

    /// Make every read fail with a store-side rejection.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("reads disabled".to_owned()));
        }
        Ok(())
    }
}

fn apply_answer(state: &mut StoreState, update: &AnswerUpdate) {
    let answer = state.answers.entry(update.key.clone()).or_default();
    if let Some(transcript) = &update.transcript {
        answer.transcript = Some(transcript.clone());
    }
    if let Some(edited) = update.has_edited_transcript {
        answer.has_edited_transcript = edited;
    }
    merge_media(&mut answer.media, &update.media);
}

fn apply_status(state: &mut StoreState, update: &TaskStatusUpdate) {
    if let Some(set) = state.sets.get_mut(&update.key) {
        apply_status_update(set, update);
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn fetch_task_set(&self, key: &SubmissionKey) -> Result<Option<TaskSet>, StoreError> {
        self.check_reads()?;
        Ok(self.task_set(key))
    }

    async fn fetch_question_attribute(
        &self,
        question: &str,
        attribute: &str,
    ) -> Result<Option<String>, StoreError> {
        self.check_reads()?;
        Ok(lock(&self.state)
            .questions
            .get(question)
            .and_then(|attrs| attrs.get(attribute))
            .cloned())
    }

    async fn fetch_answer(&self, key: &SubmissionKey) -> Result<Option<Answer>, StoreError> {
        self.check_reads()?;
        Ok(self.answer(key))
    }

    async fn create_task_set(&self, answer: AnswerUpdate, set: &TaskSet) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        state.writes.push(StoreWrite::CreateTaskSet(set.key()));
        state.sets.insert(set.key(), set.clone());
        apply_answer(&mut state, &answer);
        Ok(())
    }

    async fn update_task_status(&self, update: TaskStatusUpdate) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        apply_status(&mut state, &update);
        state.writes.push(StoreWrite::Status(update));
        Ok(())
    }

    async fn update_answer_and_task_status(
        &self,
        answer: AnswerUpdate,
        status: TaskStatusUpdate,
    ) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        apply_answer(&mut state, &answer);
        apply_status(&mut state, &status);
        state.writes.push(StoreWrite::Combined(answer, status));
        Ok(())
    }

    async fn update_answer(&self, answer: AnswerUpdate) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        apply_answer(&mut state, &answer);
        state.writes.push(StoreWrite::Answer(answer));
        Ok(())
    }

    async fn update_mentor_image(
        &self,
        mentor: &str,
        image: MentorImage,
        path: &str,
    ) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        state
            .mentor_images
            .insert((mentor.to_owned(), image), path.to_owned());
        state.writes.push(StoreWrite::MentorImage {
            mentor: mentor.to_owned(),
            image,
            path: path.to_owned(),
        });
        Ok(())
    }
}

// ── Blob store ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobOp {
    Get { bucket: String, key: String },
    Put { bucket: String, key: String },
    Delete { bucket: String, key: String },
    Exists { bucket: String, key: String },
    Presign { bucket: String, key: String },
}

impl BlobOp {
    pub fn key(&self) -> &str {
        match self {
            BlobOp::Get { key, .. }
            | BlobOp::Put { key, .. }
            | BlobOp::Delete { key, .. }
            | BlobOp::Exists { key, .. }
            | BlobOp::Presign { key, .. } => key,
        }
    }

    pub fn is_put(&self) -> bool {
        matches!(self, BlobOp::Put { .. })
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    ops: Mutex<Vec<BlobOp>>,
}

impl MemoryBlobStore {
    /// Seed an object without recording an operation.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>, content_type: &str) {
        lock(&self.objects).insert(
            (bucket.to_owned(), key.to_owned()),
            StoredObject {
                body: body.into(),
                content_type: content_type.to_owned(),
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        lock(&self.objects)
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
    }

    /// Sorted keys currently stored in `bucket`.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects)
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn ops(&self) -> Vec<BlobOp> {
        lock(&self.ops).clone()
    }

    pub fn clear_ops(&self) {
        lock(&self.ops).clear();
    }

    fn record(&self, op: BlobOp) {
        lock(&self.ops).push(op);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, BlobError> {
        self.record(BlobOp::Get {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        });
        self.object(bucket, key)
            .map(|o| o.body)
            .ok_or_else(|| BlobError::not_found(bucket, key))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), BlobError> {
        self.record(BlobOp::Put {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        });
        self.insert(bucket, key, body, content_type);
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), BlobError> {
        let mut objects = lock(&self.objects);
        for key in keys {
            self.record(BlobOp::Delete {
                bucket: bucket.to_owned(),
                key: key.clone(),
            });
            objects.remove(&(bucket.to_owned(), key.clone()));
        }
        Ok(())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, BlobError> {
        self.record(BlobOp::Exists {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        });
        Ok(self.object(bucket, key).is_some())
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        content_length: u64,
        expires_in: Duration,
    ) -> Result<PresignedUpload, BlobError> {
        self.record(BlobOp::Presign {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        });
        Ok(PresignedUpload {
            url: format!("memory://{bucket}/{key}?expires={}", expires_in.as_secs()),
            method: "PUT".to_owned(),
            headers: BTreeMap::from([
                ("content-length".to_owned(), content_length.to_string()),
                ("content-type".to_owned(), content_type.to_owned()),
            ]),
        })
    }
}

// ── Media engine ──────────────────────────────────────────────────────────────

const MP4_MAGIC: &[u8] = b"\x00\x00\x00\x20ftypisom\x00\x00\x02\x00isomiso2avc1mp41";
const WEBM_MAGIC: &[u8] = &[
    0x1A, 0x45, 0xDF, 0xA3, 0x9F, 0x42, 0x86, 0x81, 0x01, 0x42, 0xF7, 0x81, 0x01, 0x42, 0xF2, 0x81,
    0x04, 0x42, 0xF3, 0x81, 0x08, 0x42, 0x82, 0x84, b'w', b'e', b'b', b'm', 0x42, 0x87, 0x81, 0x04,
];

/// Probe result for a 1920x1080 source with audio.
pub fn probe_info(container: &str, duration: f64) -> ProbeInfo {
    let codec = if container == "webm" { "vp9" } else { "h264" };
    ProbeInfo {
        duration,
        width: 1920,
        height: 1080,
        has_audio: true,
        container: container.to_owned(),
        codec: Some(codec.to_owned()),
    }
}

/// Bytes of a fake video file. A width of zero stands for a file without
/// a video stream.
pub fn fake_video(info: &ProbeInfo) -> Vec<u8> {
    let mut bytes = match info.container.as_str() {
        "webm" => WEBM_MAGIC.to_vec(),
        _ => MP4_MAGIC.to_vec(),
    };
    bytes.extend(serde_json::to_vec(info).unwrap_or_default());
    bytes
}

fn read_fake(bytes: &[u8], source: &str) -> Result<ProbeInfo, MediaError> {
    let start = bytes
        .iter()
        .position(|b| *b == b'{')
        .ok_or_else(|| MediaError::Probe(format!("{source}: not a fake video")))?;
    serde_json::from_slice(&bytes[start..]).map_err(|e| MediaError::Probe(format!("{source}: {e}")))
}

fn output_container(output: &Path) -> (String, String) {
    match output.extension().and_then(|e| e.to_str()) {
        Some("webm") => ("webm".to_owned(), "vp9".to_owned()),
        _ => ("mp4".to_owned(), "h264".to_owned()),
    }
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn scale_of(filter: &str) -> Option<(u32, u32)> {
    let scale = filter.split(',').find_map(|part| part.strip_prefix("scale="))?;
    let (w, h) = scale.split_once(':')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    Probe,
    Encode(EncodeArgs),
    Remux,
    ExtractAudio,
}

#[derive(Debug, Default)]
pub struct FakeMediaEngine {
    calls: Mutex<Vec<MediaCall>>,
    fail_encode: AtomicBool,
}

impl FakeMediaEngine {
    pub fn calls(&self) -> Vec<MediaCall> {
        lock(&self.calls).clone()
    }

    pub fn fail_encode(&self, fail: bool) {
        self.fail_encode.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: MediaCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl MediaEngine for FakeMediaEngine {
    async fn probe(&self, input: &Path) -> Result<ProbeInfo, MediaError> {
        self.record(MediaCall::Probe);
        let bytes = tokio::fs::read(input).await?;
        let source = input.display().to_string();
        let info = read_fake(&bytes, &source)?;
        if info.width == 0 {
            return Err(MediaError::NoVideoStream(source));
        }
        Ok(info)
    }

    async fn encode(&self, input: &Path, args: &EncodeArgs, output: &Path) -> Result<(), MediaError> {
        self.record(MediaCall::Encode(args.clone()));
        if self.fail_encode.load(Ordering::SeqCst) {
            return Err(MediaError::Ffmpeg("injected encode failure".to_owned()));
        }
        let mut info = read_fake(&tokio::fs::read(input).await?, &input.display().to_string())?;

        let start = arg_after(&args.output, "-ss").and_then(|v| v.parse::<f64>().ok());
        let end = arg_after(&args.output, "-to").and_then(|v| v.parse::<f64>().ok());
        if let (Some(start), Some(end)) = (start, end) {
            if start >= info.duration {
                return Err(MediaError::Ffmpeg(format!(
                    "seek to {start} past end of {}s input",
                    info.duration
                )));
            }
            info.duration = end.min(info.duration) - start;
        }
        if let Some((w, h)) = arg_after(&args.output, "-filter:v").and_then(scale_of) {
            info.width = w;
            info.height = h;
        }
        let (container, codec) = output_container(output);
        info.container = container;
        info.codec = Some(codec);
        tokio::fs::write(output, fake_video(&info)).await?;
        Ok(())
    }

    async fn remux(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        self.record(MediaCall::Remux);
        let mut info = read_fake(&tokio::fs::read(input).await?, &input.display().to_string())?;
        info.container = output_container(output).0;
        tokio::fs::write(output, fake_video(&info)).await?;
        Ok(())
    }

    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        self.record(MediaCall::ExtractAudio);
        let info = read_fake(&tokio::fs::read(input).await?, &input.display().to_string())?;
        if !info.has_audio {
            return Err(MediaError::NoAudioStream(input.display().to_string()));
        }
        tokio::fs::write(output, b"ID3 fake audio").await?;
        Ok(())
    }
}

// ── Transcription engine ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriberMode {
    /// Record the job and do nothing else; the test delivers artifacts.
    Manual,
    /// Write the artifacts for `transcript` right away and announce them.
    Complete { transcript: String },
    /// Report the job as failed.
    Fail { message: String },
}

#[derive(Debug)]
pub struct FakeTranscriber {
    blobs: Arc<MemoryBlobStore>,
    events: mpsc::Sender<PipelineEvent>,
    mode: Mutex<TranscriberMode>,
    fail_start: AtomicBool,
    jobs: Mutex<Vec<TranscriptionJob>>,
}

impl FakeTranscriber {
    pub fn new(blobs: Arc<MemoryBlobStore>, events: mpsc::Sender<PipelineEvent>) -> Self {
        Self {
            blobs,
            events,
            mode: Mutex::new(TranscriberMode::Manual),
            fail_start: AtomicBool::new(false),
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: TranscriberMode) {
        *lock(&self.mode) = mode;
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<TranscriptionJob> {
        lock(&self.jobs).clone()
    }

    /// Write the job's artifacts the way the real engine does: json first,
    /// then vtt when there was speech, each followed by its event.
    pub async fn deliver(&self, job: &TranscriptionJob, transcript: &str) -> Result<(), BlobError> {
        deliver(&self.blobs, &self.events, job, transcript).await
    }
}

async fn deliver(
    blobs: &MemoryBlobStore,
    events: &mpsc::Sender<PipelineEvent>,
    job: &TranscriptionJob,
    transcript: &str,
) -> Result<(), BlobError> {
    let json_key = format!("{}/{TRANSCRIBE_JSON}", job.output_prefix);
    let document = serde_json::to_vec(&TranscriptDocument::from_text(transcript))
        .map_err(|e| BlobError::S3(e.to_string()))?;
    blobs
        .put_object(&job.output_bucket, &json_key, Bytes::from(document), "application/json")
        .await?;
    announce(events, &job.output_bucket, json_key).await;

    if !transcript.is_empty() {
        let vtt_key = format!("{}/{TRANSCRIBE_VTT}", job.output_prefix);
        let vtt = segments_to_vtt(&[Segment {
            start: 0.0,
            end: 1.0,
            text: transcript.to_owned(),
        }]);
        blobs
            .put_object(&job.output_bucket, &vtt_key, Bytes::from(vtt), VTT_CONTENT_TYPE)
            .await?;
        announce(events, &job.output_bucket, vtt_key).await;
    }
    Ok(())
}

async fn announce(events: &mpsc::Sender<PipelineEvent>, bucket: &str, key: String) {
    let _ = events
        .send(PipelineEvent::ObjectCreated(StorageEvent {
            bucket: bucket.to_owned(),
            key,
        }))
        .await;
}

#[async_trait]
impl TranscriptionEngine for FakeTranscriber {
    async fn start_job(&self, job: TranscriptionJob) -> Result<JobHandle, TranscribeError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(TranscribeError::Status {
                status: 503,
                body: "injected start failure".to_owned(),
            });
        }
        lock(&self.jobs).push(job.clone());
        let handle = JobHandle {
            job_id: format!("fake-{}", job.task_id),
        };

        let mode = lock(&self.mode).clone();
        let blobs = Arc::clone(&self.blobs);
        let events = self.events.clone();
        match mode {
            TranscriberMode::Manual => {}
            TranscriberMode::Complete { transcript } => {
                tokio::spawn(async move {
                    let _ = deliver(&blobs, &events, &job, &transcript).await;
                });
            }
            TranscriberMode::Fail { message } => {
                tokio::spawn(async move {
                    let _ = events
                        .send(PipelineEvent::TranscriptionFailed {
                            key: job.key,
                            task_id: job.task_id,
                            correlation_id: job.correlation_id,
                            message,
                        })
                        .await;
                });
            }
        }
        Ok(handle)
    }
}

// ── Wired pipeline ────────────────────────────────────────────────────────────

/// A full pipeline over the in-memory collaborators, with the event router
/// already draining the transcriber's events.
pub struct TestPipeline {
    pub services: Services,
    pub orchestrator: Orchestrator,
    pub router: EventRouter,
    pub store: Arc<MemoryStatusStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub media: Arc<FakeMediaEngine>,
    pub transcriber: Arc<FakeTranscriber>,
    _events: JoinHandle<()>,
}

impl TestPipeline {
    pub fn config() -> PipelineConfig {
        PipelineConfig {
            min_video_duration_ms: 1000,
            transcribe_timeout_secs: 5,
            ..PipelineConfig::default()
        }
    }

    pub fn start() -> Self {
        Self::with_config(Self::config())
    }

    pub fn with_config(config: PipelineConfig) -> Self {
        let store = Arc::new(MemoryStatusStore::default());
        let blobs = Arc::new(MemoryBlobStore::default());
        let media = Arc::new(FakeMediaEngine::default());
        let (events_tx, events_rx) = mpsc::channel(64);
        let transcriber = Arc::new(FakeTranscriber::new(Arc::clone(&blobs), events_tx));
        let services = Services::new(
            config,
            store.clone(),
            blobs.clone(),
            media.clone(),
            transcriber.clone(),
        );
        let orchestrator = Orchestrator::start(services.clone(), 16, 4);
        let router = EventRouter::new(services.clone());
        let events = router.clone().spawn(events_rx);
        Self {
            services,
            orchestrator,
            router,
            store,
            blobs,
            media,
            transcriber,
            _events: events,
        }
    }

    /// Place a fake video in the upload bucket.
    pub fn upload(&self, key: &str, info: &ProbeInfo) {
        self.blobs
            .insert(&self.services.config.buckets.upload, key, fake_video(info), "application/octet-stream");
    }

    /// Wait until the workflow for `key` has written its final umbrella
    /// status and let go of its claim.
    pub async fn settled(&self, key: &SubmissionKey) -> TaskSet {
        for _ in 0..500 {
            if let Some(set) = self.store.task_set(key) {
                if set.status.is_terminal() && self.orchestrator.storage().snapshot(key).await.is_none() {
                    return set;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("workflow for {key} did not settle");
    }
}
