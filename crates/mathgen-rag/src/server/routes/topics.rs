//! Topic listing endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct TopicsResponse {
    pub topics: Vec<String>,
    pub count: usize,
}

/// GET /api/topics - List configured topics
pub async fn list_topics(State(state): State<AppState>) -> Json<TopicsResponse> {
    let topics = state.orchestrator().available_topics();
    Json(TopicsResponse {
        count: topics.len(),
        topics,
    })
}
