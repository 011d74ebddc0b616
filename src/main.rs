//! # Passkey Relying-Party Server
//!
//! Entry point: loads configuration, opens the database, starts the
//! challenge janitor and serves the HTTP API.

use passkey_rp_server::config::Config;
use passkey_rp_server::create_router;
use passkey_rp_server::state::AppState;
use tower_sessions_sqlx_store::SqliteStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main application entry point
///
/// 1. Sets up logging
/// 2. Loads configuration from environment variables
/// 3. Initializes the database and the ceremony engine
/// 4. Starts a background task that purges expired challenges
/// 5. Configures SQLite-backed HTTP sessions
/// 6. Starts the HTTP server
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: info for dependencies, debug for this crate; RUST_LOG overrides
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,passkey_rp_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded: {:?}", config);

    let app_state = AppState::new(&config).await?;
    tracing::info!(
        rp_id = %config.rp_id,
        origin = %config.rp_origin,
        "Application state initialized"
    );

    // Expired challenges are rejected on consume anyway; this only keeps
    // abandoned ceremonies from piling up
    let engine = app_state.engine.clone();
    let cleanup_interval = config.cleanup_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            match engine.challenges().purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged expired challenges"),
                Err(e) => tracing::error!("Challenge cleanup failed: {:?}", e),
            }
        }
    });

    let session_store = SqliteStore::new(app_state.db.clone());
    session_store.migrate().await?;

    let app = create_router(app_state, session_store);

    let bind_addr = config.bind_address();
    tracing::info!("Starting server on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
