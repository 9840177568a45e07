//! Corpus reload endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::error::Result;
use crate::orchestrator::HealthReport;
use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub health: HealthReport,
}

/// POST /api/reload - Reload the corpus and rebuild the index
///
/// Requests keep being served from the previous index while this runs.
pub async fn reload(State(state): State<AppState>) -> Result<Json<ReloadResponse>> {
    tracing::info!("Reload requested");
    state.orchestrator().initialize(true).await?;
    Ok(Json(ReloadResponse {
        success: true,
        health: state.orchestrator().health(),
    }))
}
