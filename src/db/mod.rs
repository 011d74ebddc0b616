//! # Database Module
//!
//! Storage contracts for the ceremony engine and their implementations:
//! - `models`: records (Identity, CredentialRecord, ChallengeRecord)
//! - `users`: identity provisioning (create and look up users)
//! - `challenges`: SQLite [`ChallengeStore`]
//! - `credentials`: SQLite [`CredentialRepository`]
//! - `memory`: in-process implementations of both contracts
//!
//! ## Why traits?
//! The engine only needs the contracts below. Keeping them as traits lets the
//! server run on SQLite while tests (and single-process deployments) use the
//! in-memory stores, without the engine knowing the difference.

pub mod challenges;
pub mod credentials;
pub mod memory;
pub mod models;
pub mod users;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::db::models::{CeremonyKind, ChallengeRecord, CredentialRecord};
use crate::error::{CeremonyError, StorageError};

pub use challenges::SqliteChallengeStore;
pub use credentials::SqliteCredentialRepository;
pub use memory::{MemoryChallengeStore, MemoryCredentialRepository};

/// Default lifetime of an issued challenge
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(60);

/// Length of generated challenge nonces in bytes
pub const NONCE_LEN: usize = 32;

/// Short-lived, single-use challenges keyed by (identity, ceremony kind)
///
/// ## Contract
/// - `issue` atomically replaces whatever record exists for the key; the last
///   writer wins and older nonces become unconsumable immediately
/// - `consume` succeeds at most once per issued record, even under
///   concurrent calls
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Mint, persist and return a fresh challenge
    async fn issue(
        &self,
        identity_id: &str,
        kind: CeremonyKind,
    ) -> Result<ChallengeRecord, CeremonyError>;

    /// Take the active challenge for the key if `nonce` matches it
    ///
    /// ## Errors
    /// - `NoActiveChallenge`: nothing issued, or already consumed
    /// - `ChallengeExpired`: past expiry (the record is purged)
    /// - `ChallengeMismatch`: `nonce` differs from the stored one
    async fn consume(
        &self,
        identity_id: &str,
        kind: CeremonyKind,
        nonce: &[u8],
    ) -> Result<ChallengeRecord, CeremonyError>;

    /// Delete every expired record, returning how many were removed
    async fn purge_expired(&self) -> Result<u64, StorageError>;

    /// Lifetime given to newly issued challenges
    fn ttl(&self) -> Duration;
}

/// Durable set of registered credentials
///
/// Identity ids are opaque here: a record may name any identity, whether or
/// not it has been provisioned in `users`.
///
/// Unknown transport hints are dropped on insert.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Global lookup by credential id, regardless of owner
    async fn find_by_credential_id(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<CredentialRecord>, StorageError>;

    /// All credentials of an identity, in insertion order
    async fn list_for_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<CredentialRecord>, StorageError>;

    /// Store a new credential
    ///
    /// Fails with `DuplicateCredential` if the id exists for *any* identity.
    /// The uniqueness check and the write are a single atomic step.
    async fn insert(&self, record: CredentialRecord) -> Result<(), CeremonyError>;

    /// Advance the signature counter (and stamp last use)
    ///
    /// The write only lands if `new_counter` is greater than the stored value,
    /// or the stored value is 0, so a late writer can never move it backwards.
    ///
    /// ## Errors
    /// - `UnknownCredential`: the id isn't stored
    /// - `PossibleCloneDetected`: the stored counter is already at or past
    ///   `new_counter` (nothing is written)
    async fn update_counter(
        &self,
        credential_id: &[u8],
        new_counter: u32,
    ) -> Result<(), CeremonyError>;
}

/// Creation and expiry instants for a challenge issued now
///
/// Truncated to whole milliseconds, the resolution challenges are persisted
/// at, so an issued record equals the one later consumed.
pub(crate) fn challenge_window(
    ttl: Duration,
) -> Result<(DateTime<Utc>, DateTime<Utc>), StorageError> {
    let ttl = ChronoDuration::from_std(ttl)
        .map_err(|_| StorageError::Corrupt("Challenge TTL out of range".to_string()))?;
    let created_at = DateTime::from_timestamp_millis(Utc::now().timestamp_millis())
        .ok_or_else(|| StorageError::Corrupt("Clock out of range".to_string()))?;
    let expires_at = created_at
        .checked_add_signed(ttl)
        .ok_or_else(|| StorageError::Corrupt("Challenge TTL out of range".to_string()))?;
    Ok((created_at, expires_at))
}

/// Fill a fresh nonce from the operating system's CSPRNG
pub(crate) fn generate_nonce() -> Vec<u8> {
    use rand::RngCore;

    let mut nonce = vec![0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// In-memory SQLite pool with migrations applied
///
/// A single connection keeps every query on the same `:memory:` database.
#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}
