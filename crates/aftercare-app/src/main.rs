//! Aftercare application binary - composition root.
//!
//! 1. Load configuration from TOML
//! 2. Open the SQLite session store
//! 3. Build the external service adapters (HTTP or scripted demo)
//! 4. Start the inactive-session sweeper
//! 5. Start the axum REST API server

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use aftercare_adapters::{CallPolicy, ScriptedServices, ServiceAdapters};
use aftercare_agent::SupportController;
use aftercare_api::{start_server, AppState};
use aftercare_core::config::AftercareConfig;
use aftercare_core::types::Timestamp;
use aftercare_storage::{Database, SqliteSessionStore};

use cli::CliArgs;

/// Periodically close sessions that have been idle too long.
async fn session_sweeper(controller: Arc<SupportController>, interval_secs: u64) {
    tracing::info!(interval_secs, "Session sweeper started");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        interval.tick().await;
        match controller.sweep_inactive(Timestamp::now()) {
            Ok(closed) if !closed.is_empty() => {
                tracing::debug!(count = closed.len(), "Sweep closed sessions")
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Session sweep failed"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = AftercareConfig::load_or_default(&config_file);
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    config.general.port = args.resolve_port(config.general.port);
    if args.demo {
        config.services.demo = true;
    }

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Aftercare v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration resolved");

    // Storage.
    let data_dir = cli::expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("aftercare.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");
    let store = Arc::new(SqliteSessionStore::new(db));

    // External services.
    let policy = CallPolicy::from_config(&config.turn, &config.retry);
    let adapters = if config.services.demo {
        tracing::info!("Using scripted demo services");
        Arc::new(ScriptedServices::demo()).adapters(policy)
    } else {
        ServiceAdapters::from_config(&config.services, policy)?
    };

    let sweep_interval = config.session.sweep_interval_secs;
    let controller = Arc::new(SupportController::with_pattern_classifier(
        store,
        adapters,
        config.clone(),
    ));

    // === Background tasks ===
    let sweeper_controller = Arc::clone(&controller);
    tokio::spawn(async move {
        session_sweeper(sweeper_controller, sweep_interval).await;
    });

    // === API server ===
    start_server(&config, AppState::new(controller)).await?;

    Ok(())
}
