//! MedAI application binary - composition root.
//!
//! 1. Parse CLI arguments and load `.env`
//! 2. Load configuration from TOML and apply overrides
//! 3. Initialize logging
//! 4. Open the SQLite database (applying migrations)
//! 5. Build the model client and start the axum API server
//!
//! On Ctrl-C the server drains in-flight requests and the database is closed.

mod cli;

use std::sync::Arc;

use clap::Parser;

use medai_api::state::AppState;
use medai_chat::GeminiClient;
use medai_core::config::MedaiConfig;
use medai_storage::{migrations, Database};

use cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();
    let dotenv = dotenvy::dotenv();

    // Config, then CLI/env overrides.
    let config_file = args.resolve_config_path();
    let config_exists = config_file.exists();
    let mut config = if config_exists {
        MedaiConfig::load(&config_file)?
    } else {
        MedaiConfig::default()
    };
    config.server.host = args.resolve_host(&config.server.host);
    config.server.port = args.resolve_port(config.server.port);

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(args.resolve_log_filter(&config.general.log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting MedAI v{}", env!("CARGO_PKG_VERSION"));
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }
    if config_exists {
        tracing::info!(path = %config_file.display(), "Configuration loaded");
    } else {
        tracing::info!(path = %config_file.display(), "No config file found; using defaults");
    }

    // Storage.
    let data_dir = args.resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("medai.db");
    let db = Database::new(&db_path)?;
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    match args.command() {
        Command::InitDb => {
            let version = db.with_conn(migrations::schema_version)?;
            tracing::info!(path = %db_path.display(), schema_version = version, "Database initialized");
            db.close()?;
            Ok(())
        }
        Command::Serve => serve(config, db).await,
    }
}

async fn serve(config: MedaiConfig, db: Database) -> Result<(), Box<dyn std::error::Error>> {
    let model = Arc::new(GeminiClient::from_config(&config.model)?);
    tracing::info!(model = %config.model.model, "Model client ready");

    let db = Arc::new(db);
    let state = AppState::new(config, Arc::clone(&db), model);

    medai_api::start_server(state, shutdown_signal()).await?;

    // The router, and every AppState clone with it, is gone once the server returns.
    match Arc::try_unwrap(db) {
        Ok(db) => db.close()?,
        Err(_) => tracing::warn!("Database still shared at shutdown; skipping explicit close"),
    }

    tracing::info!("MedAI stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
