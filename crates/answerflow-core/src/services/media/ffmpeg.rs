//! [`MediaEngine`] backed by the ffmpeg and ffprobe binaries.
//!
//! ffmpeg runs through `ffmpeg-sidecar` on the blocking pool; its log
//! events are forwarded to `tracing`. Probing shells out to
//! `ffprobe -print_format json`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ffmpeg_sidecar::command::FfmpegCommand;
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use serde_json::Value;
use tokio::process::Command;
use tokio::task;
use tracing::{debug, info, warn};

use super::{EncodeArgs, MediaEngine, MediaError, ProbeInfo, path_str};

#[derive(Debug, Clone, Default)]
pub struct FfmpegEngine {
    /// `None` uses the binary ffmpeg-sidecar resolves on its own.
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
}

impl FfmpegEngine {
    pub fn new(ffmpeg: Option<PathBuf>, ffprobe: Option<PathBuf>) -> Self {
        Self { ffmpeg, ffprobe }
    }

    fn command(&self) -> FfmpegCommand {
        let mut command = match &self.ffmpeg {
            Some(path) => FfmpegCommand::new_with_path(path),
            None => FfmpegCommand::new(),
        };
        command.hide_banner().overwrite();
        command
    }

    async fn run(&self, command: FfmpegCommand, label: &'static str) -> Result<(), MediaError> {
        task::spawn_blocking(move || run_blocking(command, label)).await?
    }
}

fn run_blocking(mut command: FfmpegCommand, label: &'static str) -> Result<(), MediaError> {
    let mut child = command.spawn()?;
    let mut last_error = None;
    let events = child
        .iter()
        .map_err(|e| MediaError::Ffmpeg(e.to_string()))?;
    for event in events {
        match event {
            FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg) => {
                warn!(job = label, "[FFmpeg] {}", msg);
                last_error = Some(msg);
            }
            FfmpegEvent::Log(level, msg) => debug!(job = label, "[FFmpeg {:?}] {}", level, msg),
            FfmpegEvent::Error(e) => {
                warn!(job = label, error = %e, "ffmpeg event error");
                last_error = Some(e);
            }
            FfmpegEvent::Done => info!(job = label, "ffmpeg finished"),
            _ => {}
        }
    }
    let status = child.wait()?;
    if status.success() {
        Ok(())
    } else {
        Err(MediaError::Ffmpeg(
            last_error.unwrap_or_else(|| format!("{label} exited with {status}")),
        ))
    }
}

/// Read the fields the pipeline needs from `ffprobe -show_format -show_streams`.
pub fn parse_ffprobe(json: &Value, source: &str) -> Result<ProbeInfo, MediaError> {
    let streams = json["streams"].as_array().map(Vec::as_slice).unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s["codec_type"] == "video")
        .ok_or_else(|| MediaError::NoVideoStream(source.to_owned()))?;
    let has_audio = streams.iter().any(|s| s["codec_type"] == "audio");

    let dimension = |field: &str| {
        video[field]
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| MediaError::Probe(format!("{source}: missing {field}")))
    };

    let duration = json["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| video["duration"].as_str().and_then(|s| s.parse::<f64>().ok()))
        .unwrap_or(0.0);

    Ok(ProbeInfo {
        duration,
        width: dimension("width")?,
        height: dimension("height")?,
        has_audio,
        container: json["format"]["format_name"]
            .as_str()
            .unwrap_or_default()
            .to_owned(),
        codec: video["codec_name"].as_str().map(str::to_owned),
    })
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn probe(&self, input: &Path) -> Result<ProbeInfo, MediaError> {
        let binary = self
            .ffprobe
            .clone()
            .unwrap_or_else(|| PathBuf::from("ffprobe"));
        let output = Command::new(binary)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(input)
            .output()
            .await?;
        if !output.status.success() {
            return Err(MediaError::Probe(
                String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            ));
        }
        let json: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| MediaError::Probe(format!("unreadable ffprobe output: {e}")))?;
        parse_ffprobe(&json, &input.display().to_string())
    }

    async fn encode(&self, input: &Path, args: &EncodeArgs, output: &Path) -> Result<(), MediaError> {
        let mut command = self.command();
        command
            .args(&args.input)
            .input(path_str(input)?)
            .args(&args.output)
            .output(path_str(output)?);
        self.run(command, "encode").await
    }

    async fn remux(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        let mut command = self.command();
        command.input(path_str(input)?).output(path_str(output)?);
        self.run(command, "remux").await
    }

    async fn extract_audio(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        let mut command = self.command();
        command
            .input(path_str(input)?)
            .args(["-vn", "-c:a", "libmp3lame", "-q:a", "4", "-f", "mp3"])
            .output(path_str(output)?);
        self.run(command, "extract-audio").await
    }
}
