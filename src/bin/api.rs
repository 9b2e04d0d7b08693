use memoryos::{
    api::start_server, memory::InMemoryMemoryStore, MemoryOs, MemoryOsConfig,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = MemoryOsConfig::from_env()?;
    let port = config.port;

    info!("MemoryOS - API Server");
    info!(
        port,
        max_tokens = config.max_tokens,
        strategy = %config.default_strategy,
        "configuration loaded"
    );

    let memoryos = Arc::new(MemoryOs::new(config, Arc::new(InMemoryMemoryStore::new()))?);

    info!("MemoryOS initialized");

    start_server(memoryos, port).await?;

    Ok(())
}
