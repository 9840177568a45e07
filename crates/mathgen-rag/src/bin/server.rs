//! Question generation server binary
//!
//! Run with: cargo run -p mathgen-rag --bin mathgen-rag-server

use mathgen_rag::{config::RagConfig, server::RagServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mathgen_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = RagConfig::from_env()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Corpus directory: {}", config.corpus.data_dir.display());
    tracing::info!(
        "  - Embedding model: {} ({:?}, {} dims)",
        config.embeddings.model,
        config.embeddings.backend,
        config.embeddings.dimensions
    );
    tracing::info!("  - Index: {}", config.vector_db.storage_path.display());
    tracing::info!("  - Generation model: {}", config.generation.model);
    tracing::info!("  - Minimum call interval: {:?}", config.generation.min_interval());
    if !config.generation.has_credential() {
        tracing::warn!("GEMINI_API_KEY is not set; generation requests will be rejected");
    }

    let server = RagServer::new(config)?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/api/health", server.address());
    println!("\nEndpoints:");
    println!("  POST /api/generate - Generate questions");
    println!("  GET  /api/topics   - List topics");
    println!("  POST /api/reload   - Reload corpus");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
