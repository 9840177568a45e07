//! Application state for the HTTP adapter

use crate::orchestrator::RagOrchestrator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    orchestrator: RagOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: RagOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Get the orchestrator
    pub fn orchestrator(&self) -> &RagOrchestrator {
        &self.orchestrator
    }
}
