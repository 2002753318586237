//! Media engine: probing, encoding, remuxing and audio extraction.

pub mod ffmpeg;
pub mod profile;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;

pub use profile::EncodeArgs;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("no video stream in {0}")]
    NoVideoStream(String),

    #[error("no audio stream in {0}")]
    NoAudioStream(String),

    #[error("path is not valid utf-8: {0}")]
    InvalidPath(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker thread failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What a probe learns about a media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    /// Seconds.
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
    pub container: String,
    /// Codec of the first video stream.
    pub codec: Option<String>,
}

impl ProbeInfo {
    pub fn duration_ms(&self) -> u64 {
        (self.duration * 1000.0).round().max(0.0) as u64
    }
}

#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    async fn probe(&self, input: &Path) -> Result<ProbeInfo, MediaError>;

    async fn encode(&self, input: &Path, args: &EncodeArgs, output: &Path) -> Result<(), MediaError>;

    /// Copy streams into the container implied by `output`'s extension.
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), MediaError>;

    /// Extract the audio track as mp3.
    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), MediaError>;
}

/// Detect a MIME type from content, ignoring any declared extension.
pub fn sniff_mime(head: &[u8]) -> Option<&'static str> {
    infer::get(head).map(|kind| kind.mime_type())
}

const SNIFF_LEN: usize = 8192;

pub async fn sniff_file(path: &Path) -> Result<Option<&'static str>, MediaError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    (&mut file).take(SNIFF_LEN as u64).read_to_end(&mut head).await?;
    Ok(sniff_mime(&head))
}

pub(crate) fn path_str(path: &Path) -> Result<&str, MediaError> {
    path.to_str()
        .ok_or_else(|| MediaError::InvalidPath(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_by_content() {
        let mut mp4 = vec![0, 0, 0, 0x20];
        mp4.extend_from_slice(b"ftypisom\0\0\x02\0isomiso2avc1mp41");
        assert_eq!(sniff_mime(&mp4), Some("video/mp4"));
        assert_eq!(sniff_mime(b"plain text, not a video"), None);
    }
}
