//! WebVTT helpers: validation of uploaded documents and generation from
//! plain transcripts or timed segments.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::runtime::error::PipelineError;

pub const VTT_CONTENT_TYPE: &str = "text/vtt";

/// Characters per generated cue, before extending to the next word boundary.
const PIECE_LENGTH: usize = 68;
/// Generated cues start slightly late to line up with speech onset.
const CUE_OFFSET_SECS: f64 = 0.85;

static CUE_TIMING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\d{2}:\d{2}:\d{2}\.\d{3} --> \d{2}:\d{2}:\d{2}\.\d{3}$")
        .expect("valid cue timing regex")
});

/// A timed piece of transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

pub fn validate_vtt(document: &str) -> Result<(), PipelineError> {
    if !document.trim_start_matches('\u{feff}').starts_with("WEBVTT") {
        return Err(PipelineError::Validation(
            "invalid VTT file: missing WEBVTT header".into(),
        ));
    }
    if !CUE_TIMING.is_match(document) {
        return Err(PipelineError::Validation(
            "invalid VTT file: no cue timings found".into(),
        ));
    }
    Ok(())
}

fn timestamp(secs: f64) -> String {
    let millis = (secs.max(0.0) * 1000.0).round() as u64;
    let (hours, rest) = (millis / 3_600_000, millis % 3_600_000);
    let (minutes, rest) = (rest / 60_000, rest % 60_000);
    format!("{hours:02}:{minutes:02}:{:02}.{:03}", rest / 1000, rest % 1000)
}

fn push_cue(out: &mut String, start: f64, end: f64, text: &str) {
    let _ = write!(out, "{} --> {}\n{}\n\n", timestamp(start), timestamp(end), text);
}

/// Byte offsets where cues begin: the first space past every multiple of
/// `PIECE_LENGTH`, so words are never split.
fn split_points(transcript: &str) -> Vec<usize> {
    let spaces: Vec<usize> = transcript.match_indices(' ').map(|(i, _)| i).collect();
    let mut points = vec![0];
    for k in 1..spaces.len() {
        if let Some(&at) = spaces[1..].iter().find(|&&i| i > PIECE_LENGTH * k) {
            if points.last().is_some_and(|&last| last < at) {
                points.push(at);
            }
        }
    }
    points.push(transcript.len());
    points
}

/// Build a VTT document from an untimed transcript spread evenly over
/// `duration` seconds. Returns `None` when there is nothing to time.
pub fn transcript_to_vtt(transcript: &str, duration: f64) -> Option<String> {
    if duration <= 0.0 || transcript.trim().is_empty() {
        return None;
    }
    let points = split_points(transcript);
    let chunks = transcript.len().div_ceil(PIECE_LENGTH) as f64;
    let per_chunk = duration / chunks;

    let mut vtt = String::from("WEBVTT FILE:\n\n");
    for (j, bounds) in points.windows(2).enumerate() {
        let start = (per_chunk * j as f64 * 100.0).round() / 100.0 + CUE_OFFSET_SECS;
        let end = (per_chunk * (j + 1) as f64 * 100.0).round() / 100.0 + CUE_OFFSET_SECS;
        push_cue(&mut vtt, start, end, &transcript[bounds[0]..bounds[1]]);
    }
    Some(vtt)
}

pub fn segments_to_vtt(segments: &[Segment]) -> String {
    let mut vtt = String::from("WEBVTT\n\n");
    for segment in segments.iter().filter(|s| !s.text.trim().is_empty()) {
        push_cue(&mut vtt, segment.start, segment.end, segment.text.trim());
    }
    vtt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_documents() {
        let vtt = "WEBVTT\n\n00:00:00.000 --> 00:00:02.500\nhello\n";
        assert!(validate_vtt(vtt).is_ok());
    }

    #[test]
    fn rejects_missing_header_or_cues() {
        assert!(validate_vtt("00:00:00.000 --> 00:00:02.500\nhello\n").is_err());
        assert!(validate_vtt("WEBVTT\n\n0:00.000 --> 0:02.500\nhello\n").is_err());
        assert!(validate_vtt("WEBVTT\n").is_err());
    }

    #[test]
    fn generated_vtt_is_valid_and_keeps_words_whole() {
        let transcript = "the quick brown fox jumps over the lazy dog ".repeat(6);
        let transcript = transcript.trim();
        let vtt = transcript_to_vtt(transcript, 30.0).expect("vtt");
        validate_vtt(&vtt).expect("generated vtt should validate");

        assert!(vtt.starts_with("WEBVTT FILE:\n\n00:00:00.850 --> "));
        let cues: Vec<&str> = vtt
            .split("\n\n")
            .skip(1)
            .filter_map(|block| block.split_once('\n').map(|(_, text)| text))
            .collect();
        assert!(cues.len() >= 3);
        assert_eq!(cues.concat(), transcript);
        assert!(cues[1..].iter().all(|cue| cue.starts_with(' ')));
    }

    #[test]
    fn nothing_to_generate_without_duration_or_text() {
        assert_eq!(transcript_to_vtt("hello", 0.0), None);
        assert_eq!(transcript_to_vtt("  ", 10.0), None);
    }

    #[test]
    fn timestamps_roll_over_minutes_and_hours() {
        assert_eq!(timestamp(0.85), "00:00:00.850");
        assert_eq!(timestamp(75.5), "00:01:15.500");
        assert_eq!(timestamp(3723.004), "01:02:03.004");
    }

    #[test]
    fn segments_become_cues() {
        let vtt = segments_to_vtt(&[
            Segment { start: 0.0, end: 1.2, text: " hi ".into() },
            Segment { start: 1.2, end: 2.0, text: " ".into() },
            Segment { start: 2.0, end: 3.5, text: "there".into() },
        ]);
        assert_eq!(
            vtt,
            "WEBVTT\n\n00:00:00.000 --> 00:00:01.200\nhi\n\n00:00:02.000 --> 00:00:03.500\nthere\n\n"
        );
    }
}
