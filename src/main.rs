//! Focal - streaming multi-provider LLM chat backend with persistent sessions

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "focal=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Focal v{}", env!("CARGO_PKG_VERSION"));

    // Run CLI
    focal::cli::run()?;

    Ok(())
}
