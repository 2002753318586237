//! Mentor-level images: the profile thumbnail and the virtual background
//! composited behind transparent answers.
//!
//! Each upload lands under a fresh timestamped key in the static bucket
//! and the mentor record is pointed at it. Earlier images stay in place.

use std::ops::RangeInclusive;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::layout::{mentor_image_key, public_url};
use crate::runtime::context::Services;
use crate::runtime::error::PipelineError;

const MENTOR_ID_LEN: RangeInclusive<usize> = 5..=60;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MentorImage {
    Thumbnail,
    VirtualBackground,
}

impl MentorImage {
    pub fn folder(self) -> &'static str {
        match self {
            MentorImage::Thumbnail => "thumbnails",
            MentorImage::VirtualBackground => "virtual_backgrounds",
        }
    }

    fn accepted(self) -> &'static [&'static str] {
        match self {
            MentorImage::Thumbnail => &["image/png"],
            MentorImage::VirtualBackground => &["image/png", "image/jpeg"],
        }
    }
}

fn extension(mime: &str) -> Option<&'static str> {
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct MentorImageUpload {
    pub mentor: String,
    pub image: MentorImage,
    /// Declared by the client; must agree with the bytes.
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MentorImageReceipt {
    pub key: String,
    pub url: String,
}

/// Store a mentor image and record it on the mentor.
///
/// The blob is written before the mentor record, so the record never names
/// an object that does not exist.
pub async fn upload_image(
    services: &Services,
    upload: MentorImageUpload,
    now: DateTime<Utc>,
) -> Result<MentorImageReceipt, PipelineError> {
    let mentor = upload.mentor.trim();
    if !MENTOR_ID_LEN.contains(&mentor.chars().count()) {
        return Err(PipelineError::Validation(format!(
            "mentor must be {} to {} characters",
            MENTOR_ID_LEN.start(),
            MENTOR_ID_LEN.end()
        )));
    }
    if mentor.contains('/') {
        return Err(PipelineError::Validation("mentor must not contain '/'".to_owned()));
    }

    let accepted = upload.image.accepted();
    if !accepted.contains(&upload.content_type.as_str()) {
        return Err(PipelineError::UnsupportedFormat(format!(
            "{} must be one of {}",
            upload.image,
            accepted.join(", ")
        )));
    }
    let sniffed = infer::get(&upload.body).map(|kind| kind.mime_type());
    if sniffed != Some(upload.content_type.as_str()) {
        return Err(PipelineError::UnsupportedFormat(format!(
            "content is not {}",
            upload.content_type
        )));
    }
    let ext = extension(&upload.content_type)
        .ok_or_else(|| PipelineError::UnsupportedFormat(upload.content_type.clone()))?;

    let config = &services.config;
    let key = mentor_image_key(mentor, upload.image, ext, now);
    let size = upload.body.len();
    services
        .blobs
        .put_object(&config.buckets.static_assets, &key, upload.body, &upload.content_type)
        .await?;
    services
        .store
        .update_mentor_image(mentor, upload.image, &key)
        .await?;

    info!(mentor, image = %upload.image, %key, bytes = size, "mentor image stored");
    Ok(MentorImageReceipt {
        url: public_url(&config.static_url_base, &key),
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StoreWrite, TestPipeline};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01\x08\x06\x00\x00\x00";
    const JPEG: &[u8] = b"\xFF\xD8\xFF\xE0\x00\x10JFIF\x00\x01\x01\x00\x00\x01\x00\x01\x00\x00";

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    fn upload(image: MentorImage, content_type: &str, body: &'static [u8]) -> MentorImageUpload {
        MentorImageUpload {
            mentor: "mentor-1".into(),
            image,
            content_type: content_type.into(),
            body: Bytes::from_static(body),
        }
    }

    #[tokio::test]
    async fn thumbnail_is_stored_then_recorded() {
        let pipeline = TestPipeline::start();
        let receipt = upload_image(
            &pipeline.services,
            upload(MentorImage::Thumbnail, "image/png", PNG),
            at(),
        )
        .await
        .expect("stored");

        let key = "mentor/thumbnails/mentor-1/20260304T050607Z/thumbnail.png";
        assert_eq!(receipt.key, key);
        assert_eq!(receipt.url, key);
        let object = pipeline.blobs.object("static", key).expect("object");
        assert_eq!(object.content_type, "image/png");
        assert_eq!(
            pipeline.store.mentor_image("mentor-1", MentorImage::Thumbnail).as_deref(),
            Some(key)
        );
        assert_eq!(
            pipeline.store.writes(),
            [StoreWrite::MentorImage {
                mentor: "mentor-1".into(),
                image: MentorImage::Thumbnail,
                path: key.into(),
            }]
        );
    }

    #[tokio::test]
    async fn virtual_background_accepts_jpeg() {
        let pipeline = TestPipeline::with_config(crate::config::PipelineConfig {
            static_url_base: "https://static.example/".into(),
            ..TestPipeline::config()
        });
        let receipt = upload_image(
            &pipeline.services,
            upload(MentorImage::VirtualBackground, "image/jpeg", JPEG),
            at(),
        )
        .await
        .expect("stored");
        assert_eq!(
            receipt.url,
            "https://static.example/mentor/virtual_backgrounds/mentor-1/20260304T050607Z/virtual_background.jpg"
        );
    }

    #[tokio::test]
    async fn rejected_images_write_nothing() {
        let pipeline = TestPipeline::start();
        let cases = [
            upload(MentorImage::Thumbnail, "image/jpeg", JPEG),
            upload(MentorImage::Thumbnail, "image/png", JPEG),
            upload(MentorImage::VirtualBackground, "image/png", b"not an image"),
            MentorImageUpload {
                mentor: "m1".into(),
                ..upload(MentorImage::Thumbnail, "image/png", PNG)
            },
            MentorImageUpload {
                mentor: "mentor/1".into(),
                ..upload(MentorImage::Thumbnail, "image/png", PNG)
            },
        ];
        for case in cases {
            let err = upload_image(&pipeline.services, case, at())
                .await
                .expect_err("rejected");
            assert!(err.is_rejection(), "{err}");
        }
        assert!(pipeline.blobs.ops().is_empty());
        assert!(pipeline.store.writes().is_empty());
    }
}
