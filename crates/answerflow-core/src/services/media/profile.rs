//! Encoder arguments for each rendition.
//!
//! Everything here is a pure function of the probed source and the
//! profile, so identical input always yields identical arguments.
//! `FILTER_VERSION` is stamped into every output and must be bumped when
//! any argument below changes.

use serde::{Deserialize, Serialize};

use crate::runtime::types::{TrimWindow, VideoFileType};

pub const FILTER_VERSION: u32 = 1;

/// Web rendition: fit a box of `max_height` with a fixed aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebProfile {
    pub max_height: u32,
    pub aspect: f64,
}

impl Default for WebProfile {
    fn default() -> Self {
        Self {
            max_height: 720,
            aspect: 1.77777,
        }
    }
}

/// Mobile rendition: a `target_size` square. Landscape sources lose
/// `landscape_zoom` of their height before being squared; the zoom is
/// clamped to `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MobileProfile {
    pub target_size: u32,
    pub landscape_zoom: f64,
}

impl MobileProfile {
    fn zoom(&self) -> f64 {
        if self.landscape_zoom.is_finite() {
            self.landscape_zoom.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

impl Default for MobileProfile {
    fn default() -> Self {
        Self {
            target_size: 480,
            landscape_zoom: 0.25,
        }
    }
}

/// Pixels cropped from the source and final output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub crop_w: u32,
    pub crop_h: u32,
    pub out_w: u32,
    pub out_h: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeArgs {
    /// Placed before `-i`.
    pub input: Vec<String>,
    /// Placed after `-i`, before the output path.
    pub output: Vec<String>,
}

/// Codecs need even dimensions.
pub fn even_up(v: u32) -> u32 {
    v + v % 2
}

fn scale_keeping_aspect(width: u32, height: u32, max_height: u32) -> Geometry {
    let out_h = max_height.min(height);
    let out_w = (f64::from(width) * f64::from(out_h) / f64::from(height.max(1))) as u32;
    Geometry {
        crop_w: 0,
        crop_h: 0,
        out_w: even_up(out_w),
        out_h: even_up(out_h),
    }
}

pub fn web_geometry(width: u32, height: u32, profile: &WebProfile, maintain_aspect: bool) -> Geometry {
    if maintain_aspect {
        return scale_keeping_aspect(width, height, profile.max_height);
    }
    let (w, h) = (f64::from(width), f64::from(height.max(1)));
    let target = profile.aspect;
    let (crop_w, crop_h, out_h) = if w / h >= target {
        let kept_w = h * target;
        ((w - kept_w) as u32, 0, profile.max_height.min(height))
    } else {
        let kept_h = w / target;
        (0, (h - kept_h) as u32, profile.max_height.min(kept_h as u32))
    };
    let out_w = (f64::from(out_h) * target) as u32;
    Geometry {
        crop_w,
        crop_h,
        out_w: even_up(out_w),
        out_h: even_up(out_h),
    }
}

pub fn mobile_geometry(
    width: u32,
    height: u32,
    profile: &MobileProfile,
    maintain_aspect: bool,
) -> Geometry {
    if maintain_aspect {
        return scale_keeping_aspect(width, height, profile.target_size);
    }
    let size = even_up(profile.target_size);
    if width > height {
        let crop_h = (f64::from(height) * profile.zoom()) as u32;
        let crop_w = width - (height - crop_h);
        Geometry {
            crop_w,
            crop_h,
            out_w: size,
            out_h: size,
        }
    } else {
        Geometry {
            crop_w: 0,
            crop_h: height - width,
            out_w: size,
            out_h: size,
        }
    }
}

fn version_tag() -> [String; 2] {
    ["-metadata".to_owned(), format!("comment=answerflow-filter-v{FILTER_VERSION}")]
}

fn codec_args(video_type: VideoFileType) -> Vec<String> {
    let args: &[&str] = match video_type {
        VideoFileType::Mp4 => &[
            "-c:v", "libx264", "-crf", "23", "-pix_fmt", "yuv420p", "-movflags", "+faststart",
            "-c:a", "aac", "-ac", "1",
        ],
        VideoFileType::WebmVp9 => &[
            "-c:v", "libvpx-vp9", "-crf", "23", "-b:v", "0", "-pix_fmt", "yuva420p",
            "-metadata:s:v:0", "alpha_mode=1", "-c:a", "libvorbis", "-ac", "1",
        ],
    };
    args.iter().map(|s| (*s).to_owned()).collect()
}

/// The VP9 software decoder is required to keep the alpha plane.
fn decoder_args(video_type: VideoFileType) -> Vec<String> {
    match video_type {
        VideoFileType::Mp4 => Vec::new(),
        VideoFileType::WebmVp9 => vec!["-c:v".to_owned(), "libvpx-vp9".to_owned()],
    }
}

pub fn transcode_args(geometry: &Geometry, video_type: VideoFileType) -> EncodeArgs {
    let filter = format!(
        "crop=iw-{}:ih-{},scale={}:{},fps=30",
        geometry.crop_w, geometry.crop_h, geometry.out_w, geometry.out_h
    );
    let mut output = vec!["-filter:v".to_owned(), filter];
    output.extend(codec_args(video_type));
    output.extend(version_tag());
    EncodeArgs {
        input: decoder_args(video_type),
        output,
    }
}

/// Re-encode the whole source into `video_type` at its own (even) resolution.
pub fn reencode_args(width: u32, height: u32, video_type: VideoFileType) -> EncodeArgs {
    let mut output = vec![
        "-filter:v".to_owned(),
        format!("scale={}:{}", even_up(width), even_up(height)),
    ];
    output.extend(codec_args(video_type));
    output.extend(version_tag());
    EncodeArgs {
        input: decoder_args(video_type),
        output,
    }
}

/// Re-encode `window` of the source at its own (even) resolution.
pub fn trim_args(width: u32, height: u32, window: &TrimWindow, video_type: VideoFileType) -> EncodeArgs {
    let mut args = reencode_args(width, height, video_type);
    let seek = [
        "-ss".to_owned(),
        format!("{:.3}", window.start),
        "-to".to_owned(),
        format!("{:.3}", window.end),
    ];
    args.output.splice(0..0, seek);
    args
}
