pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod models;
pub mod pagination;
pub mod schema;
pub mod server;
pub mod state;
pub mod store;
pub mod table;
pub mod telemetry;

use crate::{config::AppConfig, server::Server};

/// Starts the coverage ingestion service from `GSM_*` environment configuration.
pub async fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    Server::new(config).await?.run().await
}
