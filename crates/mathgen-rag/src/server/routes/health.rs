//! Health endpoint

use axum::{extract::State, Json};

use crate::orchestrator::HealthReport;
use crate::server::state::AppState;

/// GET /api/health - Pipeline health
pub async fn health_report(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.orchestrator().health())
}
