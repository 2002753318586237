//! Pipeline settings shared by every stage.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::services::media::profile::{MobileProfile, WebProfile};

/// Buckets the pipeline reads from and writes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Buckets {
    /// Where clients drop raw uploads.
    pub upload: String,
    /// Canonical originals, renditions and subtitles.
    pub static_assets: String,
    pub transcribe_input: String,
    pub transcribe_output: String,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            upload: "uploads".to_owned(),
            static_assets: "static".to_owned(),
            transcribe_input: "transcribe-input".to_owned(),
            transcribe_output: "transcribe-output".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub buckets: Buckets,
    /// Uploads shorter than this are rejected.
    pub min_video_duration_ms: u64,
    /// Question `name` marking the idle question, which is never transcribed.
    pub idle_question_name: String,
    /// How long a suspended transcription may wait for its artifacts.
    pub transcribe_timeout_secs: u64,
    pub transcribe_language: String,
    /// Prefix for the public url of the canonical original.
    pub static_url_base: String,
    /// Largest raw upload a presigned url is issued for.
    pub max_upload_bytes: u64,
    /// Lifetime of a presigned upload url.
    pub upload_url_ttl_secs: u64,
    pub web: WebProfile,
    pub mobile: MobileProfile,
    /// Parent directory for per-stage scratch directories.
    pub work_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buckets: Buckets::default(),
            min_video_duration_ms: 1000,
            idle_question_name: "_IDLE_".to_owned(),
            transcribe_timeout_secs: 2 * 60 * 60,
            transcribe_language: "en".to_owned(),
            static_url_base: String::new(),
            max_upload_bytes: 50 * 1024 * 1024,
            upload_url_ttl_secs: 60 * 60,
            web: WebProfile::default(),
            mobile: MobileProfile::default(),
            work_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn transcribe_timeout(&self) -> Duration {
        Duration::from_secs(self.transcribe_timeout_secs)
    }

    pub fn upload_url_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_url_ttl_secs)
    }

    /// Fresh scratch directory, removed when the handle drops.
    pub fn scratch_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("answerflow-");
        match &self.work_dir {
            Some(dir) => builder.tempdir_in(dir),
            None => builder.tempdir(),
        }
    }
}
