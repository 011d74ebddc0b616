//! # Application State
//!
//! Shared state accessible to all request handlers. Axum clones it for each
//! request, which is cheap because everything inside is a pool or an `Arc`.

use crate::config::Config;
use crate::db::{SqliteChallengeStore, SqliteCredentialRepository};
use crate::webauthn::{CeremonyEngine, Es256Verifier};
use anyhow::Result;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;

/// Shared application state
///
/// - `db`: identity provisioning and session storage
/// - `engine`: the ceremonies, backed by their own stores
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,

    /// Ceremony engine, wrapped in Arc so clones only copy a pointer
    pub engine: Arc<CeremonyEngine>,
}

impl AppState {
    /// Initialize application state
    ///
    /// 1. Connects to the SQLite database
    /// 2. Runs database migrations (creates tables if they don't exist)
    /// 3. Wires the SQLite stores and the ES256 verifier into the engine
    pub async fn new(config: &Config) -> Result<Self> {
        let db = SqlitePool::connect(&config.database_url).await?;

        // Migrations are embedded from ./migrations at compile time
        sqlx::migrate!("./migrations").run(&db).await?;

        let engine = CeremonyEngine::new(
            config.relying_party(),
            Arc::new(SqliteChallengeStore::new(db.clone(), config.challenge_ttl())),
            Arc::new(SqliteCredentialRepository::new(db.clone())),
            Arc::new(Es256Verifier::new()),
        );

        Ok(Self::from_parts(db, Arc::new(engine)))
    }

    /// Assemble state from an existing pool and engine
    pub fn from_parts(db: SqlitePool, engine: Arc<CeremonyEngine>) -> Self {
        AppState { db, engine }
    }
}
