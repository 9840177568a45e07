//! Question generation endpoint

use axum::{extract::rejection::JsonRejection, extract::State, Json};

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::{GenerateRequest, GenerateResponse};

/// POST /api/generate - Generate exam questions
pub async fn generate_questions(
    State(state): State<AppState>,
    payload: std::result::Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<GenerateResponse>> {
    let Json(request) = payload.map_err(|e| Error::InvalidRequest(e.body_text()))?;
    let request = request.validate()?;

    tracing::info!(
        "Generate: \"{}\" ({}, {} questions)",
        request.topic(),
        request.difficulty(),
        request.num_questions()
    );

    let outcome = state
        .orchestrator()
        .generate_questions(request.topic(), request.difficulty(), request.num_questions())
        .await?;

    Ok(Json(GenerateResponse::from(outcome)))
}
