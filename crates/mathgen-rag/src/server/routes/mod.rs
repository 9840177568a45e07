//! API routes for the question generation server

pub mod generate;
pub mod health;
pub mod reload;
pub mod topics;

use axum::{
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generate::generate_questions))
        .route("/health", get(health::health_report))
        .route("/topics", get(topics::list_topics))
        .route("/reload", post(reload::reload))
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "mathgen-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Sinhala mathematics exam question generation with retrieved textbook context",
        "endpoints": {
            "POST /api/generate": "Generate questions for a topic and difficulty",
            "GET /api/health": "Pipeline status, corpus counts and generation statistics",
            "GET /api/topics": "Configured topics",
            "POST /api/reload": "Reload the corpus and rebuild the index"
        }
    }))
}
