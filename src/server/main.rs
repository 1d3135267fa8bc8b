// src/server/main.rs
// Entry point for the gigboard server
use gigboard::server::{config::ServerConfig, connection::Server, database::Database};
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    let database = Arc::new(Database::connect(&config.database_url, config.max_connections).await?);

    info!("[DB] Running migrations...");
    database.migrate().await.map_err(|e| {
        error!("[DB] Migration failed: {}", e);
        e
    })?;
    info!("[DB] Migrations completed");

    let server = Server::new(database, config.clone());
    server.run(&format!("{}:{}", config.host, config.port)).await?;
    Ok(())
}
