use answerflow_core::MentorImageReceipt;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// `multipart/form-data` body carrying one image.
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct MentorImageForm {
    /// PNG for thumbnails; PNG or JPEG for virtual backgrounds.
    #[schema(value_type = String, format = Binary)]
    pub image: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MentorImageResponse {
    pub key: String,
    /// Public url of the stored image.
    pub url: String,
}

impl From<MentorImageReceipt> for MentorImageResponse {
    fn from(receipt: MentorImageReceipt) -> Self {
        MentorImageResponse {
            key: receipt.key,
            url: receipt.url,
        }
    }
}
