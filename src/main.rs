use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nlq_engine_service::{QueryEngine, Settings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nlq_engine_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting NLQ Engine Service v0.1.0");

    let settings = Settings::from_env()?;
    info!("Configuration loaded:");
    info!("  Database URL: {}", settings.masked_database_url());
    info!("  LLM model: {}", settings.llm_model);
    info!(
        "  Redis: {}",
        if settings.redis_url.is_some() {
            "configured"
        } else {
            "disabled"
        }
    );

    let engine = Arc::new(QueryEngine::new(&settings).await?);
    info!("Query engine initialized successfully");

    let health = engine.health_check().await;
    info!(
        database = health.database,
        cache = health.cache,
        dataset_count = health.dataset_count,
        "Startup health check"
    );

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, gracefully shutting down...");
        }
        Err(err) => {
            error!("Unable to listen for shutdown signal: {}", err);
        }
    }

    info!("NLQ Engine Service shutdown complete");
    Ok(())
}
