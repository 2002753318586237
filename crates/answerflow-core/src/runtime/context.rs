use std::fmt;
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::runtime::continuation::ContinuationRegistry;
use crate::services::blob::BlobStore;
use crate::services::media::MediaEngine;
use crate::services::store::StatusStore;
use crate::services::transcribe::TranscriptionEngine;

/// Process-wide collaborator handles, built once at startup and handed to
/// every stage.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<PipelineConfig>,
    pub store: Arc<dyn StatusStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub media: Arc<dyn MediaEngine>,
    pub transcriber: Arc<dyn TranscriptionEngine>,
    pub continuations: ContinuationRegistry,
}

impl Services {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn StatusStore>,
        blobs: Arc<dyn BlobStore>,
        media: Arc<dyn MediaEngine>,
        transcriber: Arc<dyn TranscriptionEngine>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            blobs,
            media,
            transcriber,
            continuations: ContinuationRegistry::new(),
        }
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("config", &self.config)
            .field("continuations", &self.continuations)
            .finish_non_exhaustive()
    }
}
