//! W-9 MCP Server - Entry point
//!
//! Fills IRS W-9 PDFs over MCP (stdio). Configured through `W9_*`
//! environment variables, optionally from a `.env` file.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use w9_mcp_server::run_server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the real environment still applies
    let dotenv = dotenvy::dotenv();

    // Initialize logging. stdout carries the protocol.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "w9_mcp_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Ok(path) = dotenv {
        tracing::info!(path = %path.display(), "Loaded environment file");
    }
    tracing::info!("Starting W-9 MCP Server");

    run_server().await
}
