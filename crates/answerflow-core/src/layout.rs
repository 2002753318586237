//! Object key conventions.
//!
//! Every stage derives the keys it reads and writes from (mentor, question)
//! and, for transcription, the task id. Nothing else is persisted to find
//! an artifact again.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::mentor::MentorImage;
use crate::runtime::types::{SubmissionKey, TaskId};

pub const TRANSCRIBE_JSON: &str = "transcribe.json";
pub const TRANSCRIBE_VTT: &str = "transcribe.vtt";
pub const TRANSCRIBE_AUDIO: &str = "answer.mp3";

pub fn video_prefix(key: &SubmissionKey) -> String {
    format!("videos/{}/{}", key.mentor, key.question)
}

/// Key of the canonical original for a container extension.
pub fn canonical_key(key: &SubmissionKey, ext: &str) -> String {
    rendition_key(key, "original", ext)
}

pub fn rendition_key(key: &SubmissionKey, stem: &str, ext: &str) -> String {
    format!("{}/{stem}.{ext}", video_prefix(key))
}

pub fn vtt_key(key: &SubmissionKey) -> String {
    format!("{}/en.vtt", video_prefix(key))
}

/// Every derived object a fresh submission invalidates.
pub fn stale_keys(key: &SubmissionKey) -> Vec<String> {
    let mut keys = Vec::new();
    for stem in ["original", "web", "mobile"] {
        for ext in ["mp4", "webm"] {
            keys.push(rendition_key(key, stem, ext));
        }
    }
    keys.push(vtt_key(key));
    keys
}

pub fn transcribe_prefix(key: &SubmissionKey, task_id: &str) -> String {
    format!("{}/{}/{task_id}", key.mentor, key.question)
}

pub fn transcribe_input_key(key: &SubmissionKey, task_id: &str) -> String {
    format!("{}/{TRANSCRIBE_AUDIO}", transcribe_prefix(key, task_id))
}

pub fn transcribe_output_key(key: &SubmissionKey, task_id: &str, file: &str) -> String {
    format!("{}/{file}", transcribe_prefix(key, task_id))
}

/// Key a client uploads a raw answer to, in the upload bucket.
pub fn upload_object_key(uploader: &str, id: Uuid) -> String {
    format!("{uploader}/{id}")
}

/// Mentor images are never overwritten; each upload gets a timestamped folder.
pub fn mentor_image_key(mentor: &str, image: MentorImage, ext: &str, at: DateTime<Utc>) -> String {
    format!(
        "mentor/{}/{mentor}/{}/{image}.{ext}",
        image.folder(),
        at.format("%Y%m%dT%H%M%SZ")
    )
}

/// Join a public base url and an object key. An empty base leaves the key as is.
pub fn public_url(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_owned()
    } else {
        format!("{}/{key}", base.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Json,
    Vtt,
}

/// A transcription output object, recovered from its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscribeArtifact {
    pub key: SubmissionKey,
    pub task_id: TaskId,
    pub kind: ArtifactKind,
}

impl TranscribeArtifact {
    pub fn json_key(&self) -> String {
        transcribe_output_key(&self.key, &self.task_id, TRANSCRIBE_JSON)
    }

    pub fn vtt_key(&self) -> String {
        transcribe_output_key(&self.key, &self.task_id, TRANSCRIBE_VTT)
    }
}

/// Parse `{mentor}/{question}/{task_id}/transcribe.{json,vtt}`.
pub fn parse_transcribe_output(object_key: &str) -> Option<TranscribeArtifact> {
    let mut parts = object_key.trim_start_matches('/').split('/');
    let mentor = parts.next().filter(|s| !s.is_empty())?;
    let question = parts.next().filter(|s| !s.is_empty())?;
    let task_id = parts.next().filter(|s| !s.is_empty())?;
    let file = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let kind = match file {
        TRANSCRIBE_JSON => ArtifactKind::Json,
        TRANSCRIBE_VTT => ArtifactKind::Vtt,
        _ => return None,
    };
    Some(TranscribeArtifact {
        key: SubmissionKey::new(mentor, question),
        task_id: task_id.to_owned(),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_and_rendition_keys() {
        let key = SubmissionKey::new("m1", "q1");
        assert_eq!(canonical_key(&key, "webm"), "videos/m1/q1/original.webm");
        assert_eq!(rendition_key(&key, "mobile", "mp4"), "videos/m1/q1/mobile.mp4");
        assert_eq!(vtt_key(&key), "videos/m1/q1/en.vtt");
        assert_eq!(stale_keys(&key).len(), 7);
    }

    #[test]
    fn parses_transcribe_output_keys() {
        let artifact = parse_transcribe_output("m1/q1/t-9/transcribe.vtt").expect("parse");
        assert_eq!(artifact.key, SubmissionKey::new("m1", "q1"));
        assert_eq!(artifact.task_id, "t-9");
        assert_eq!(artifact.kind, ArtifactKind::Vtt);
        assert_eq!(artifact.json_key(), "m1/q1/t-9/transcribe.json");

        assert!(parse_transcribe_output("m1/q1/t-9/answer.mp3").is_none());
        assert!(parse_transcribe_output("m1/q1/transcribe.json").is_none());
        assert!(parse_transcribe_output("m1/q1/t/x/transcribe.json").is_none());
    }

    #[test]
    fn upload_and_mentor_image_keys() {
        let id = Uuid::nil();
        assert_eq!(
            upload_object_key("mentor-1", id),
            "mentor-1/00000000-0000-0000-0000-000000000000"
        );

        let at = DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z")
            .expect("timestamp")
            .with_timezone(&Utc);
        assert_eq!(
            mentor_image_key("mentor-1", MentorImage::Thumbnail, "png", at),
            "mentor/thumbnails/mentor-1/20260304T050607Z/thumbnail.png"
        );
        assert_eq!(
            mentor_image_key("mentor-1", MentorImage::VirtualBackground, "jpg", at),
            "mentor/virtual_backgrounds/mentor-1/20260304T050607Z/virtual_background.jpg"
        );
    }

    #[test]
    fn public_url_joins_base() {
        assert_eq!(public_url("", "a/b.mp4"), "a/b.mp4");
        assert_eq!(public_url("https://cdn.example/", "a/b.mp4"), "https://cdn.example/a/b.mp4");
    }
}
