//! HTTP adapter for the question generation pipeline

pub mod routes;
pub mod state;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::RagConfig;
use crate::error::{Error, Result};
use crate::orchestrator::RagOrchestrator;
use state::AppState;

/// Question generation HTTP server
pub struct RagServer {
    config: RagConfig,
    state: AppState,
}

impl RagServer {
    /// Create a new server with the configured providers
    pub fn new(config: RagConfig) -> Result<Self> {
        let orchestrator = RagOrchestrator::new(config.clone())?;
        Ok(Self::with_orchestrator(config, orchestrator))
    }

    /// Create a server around an existing orchestrator
    pub fn with_orchestrator(config: RagConfig, orchestrator: RagOrchestrator) -> Self {
        Self {
            config,
            state: AppState::new(orchestrator),
        }
    }

    pub fn orchestrator(&self) -> &RagOrchestrator {
        self.state.orchestrator()
    }

    /// Build the router with all routes
    fn build_router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_check))
            .nest("/api", routes::api_routes())
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.server.enable_cors {
            router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
        } else {
            router
        }
    }

    /// Start the server
    ///
    /// Initialization runs in the background; until it completes, generation
    /// requests are answered with `not_initialized`.
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let orchestrator = self.orchestrator().clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.initialize(true).await {
                tracing::error!("RAG system failed to initialize: {}", e);
            }
        });

        let router = self.build_router();

        tracing::info!("Starting question generation server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Get the server address
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Liveness endpoint
async fn health_check() -> &'static str {
    "OK"
}
