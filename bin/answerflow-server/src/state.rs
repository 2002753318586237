//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use answerflow_core::{EventRouter, Orchestrator, Services};

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Drives submitted workflows and accepts cancellations.
    pub orchestrator: Orchestrator,
    /// Routes storage notifications to the stage that waits for them.
    pub events: EventRouter,
}

impl AppState {
    pub fn services(&self) -> &Services {
        self.orchestrator.services()
    }
}
