//! Career chat server binary
//!
//! Run with: cargo run -p career-rag --bin career-rag-server

use career_rag::{config::RagConfig, server::RagServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "career_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path =
        std::env::var("CAREER_RAG_CONFIG").unwrap_or_else(|_| "career-rag.toml".to_string());
    let config = RagConfig::load(&config_path)?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - LLM: {:?} {} at {}", config.llm.backend, config.llm.generate_model, config.llm.base_url);
    tracing::info!("  - Embeddings: {} ({} dims)", config.llm.embed_model, config.embeddings.dimensions);
    tracing::info!("  - Evidence store: {:?}, default collection '{}'", config.vector_db.backend, config.vector_db.default_collection);
    tracing::info!("  - Web search: {}", if config.web_search.is_active() { "enabled" } else { "disabled" });
    tracing::info!(
        "  - Pipeline: top_k={}, max_retries={}, turn timeout {}s",
        config.pipeline.top_k,
        config.pipeline.max_retries,
        config.session.turn_timeout_secs
    );

    // Create and start server
    let server = RagServer::new(config).await?;

    let generator = server.state().generator();
    match generator.health_check().await {
        Ok(true) => tracing::info!("{} is reachable", generator.name()),
        _ => tracing::warn!(
            "{} is not reachable yet; turns will fail until it is available",
            generator.name()
        ),
    }

    println!("\nServer starting...");
    println!("  Chat:   ws://{}/api/chat/ws", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  Info:   http://{}/api/info", server.address());
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
