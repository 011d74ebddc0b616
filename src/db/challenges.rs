//! # Challenge Database Operations
//!
//! SQLite-backed [`ChallengeStore`].
//!
//! ## Atomicity
//! - `issue` is a single upsert on `PRIMARY KEY (user_id, kind)`, so two
//!   concurrent issues for the same key can't both survive: the later write
//!   replaces the earlier one.
//! - `consume` reads the record for its error reporting, then deletes it with
//!   a nonce-qualified `DELETE`. Only the call whose `DELETE` affects the row
//!   wins; every other caller sees `NoActiveChallenge`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::time::Duration;

use crate::db::models::{CeremonyKind, ChallengeRecord};
use crate::db::{challenge_window, generate_nonce, ChallengeStore};
use crate::error::{CeremonyError, StorageError};

#[derive(Debug, sqlx::FromRow)]
struct ChallengeRow {
    user_id: String,
    nonce: Vec<u8>,
    created_at_ms: i64,
    expires_at_ms: i64,
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Corrupt(format!("Invalid challenge timestamp {}", ms)))
}

impl ChallengeRow {
    fn into_record(self, kind: CeremonyKind) -> Result<ChallengeRecord, StorageError> {
        Ok(ChallengeRecord {
            identity_id: self.user_id,
            kind,
            nonce: self.nonce,
            created_at: from_millis(self.created_at_ms)?,
            expires_at: from_millis(self.expires_at_ms)?,
        })
    }
}

/// Challenge store persisted in the `challenges` table
#[derive(Debug, Clone)]
pub struct SqliteChallengeStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteChallengeStore {
    pub fn new(pool: SqlitePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }

    async fn delete_matching(
        &self,
        identity_id: &str,
        kind: CeremonyKind,
        nonce: &[u8],
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM challenges
             WHERE user_id = ? AND kind = ? AND nonce = ?",
        )
        .bind(identity_id)
        .bind(kind.as_str())
        .bind(nonce)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ChallengeStore for SqliteChallengeStore {
    async fn issue(
        &self,
        identity_id: &str,
        kind: CeremonyKind,
    ) -> Result<ChallengeRecord, CeremonyError> {
        let (created_at, expires_at) = challenge_window(self.ttl)?;
        let record = ChallengeRecord {
            identity_id: identity_id.to_string(),
            kind,
            nonce: generate_nonce(),
            created_at,
            expires_at,
        };

        sqlx::query(
            "INSERT INTO challenges (user_id, kind, nonce, created_at_ms, expires_at_ms)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (user_id, kind) DO UPDATE SET
                 nonce = excluded.nonce,
                 created_at_ms = excluded.created_at_ms,
                 expires_at_ms = excluded.expires_at_ms",
        )
        .bind(&record.identity_id)
        .bind(kind.as_str())
        .bind(&record.nonce)
        .bind(record.created_at.timestamp_millis())
        .bind(record.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        tracing::debug!(identity = identity_id, %kind, "Issued challenge");

        Ok(record)
    }

    async fn consume(
        &self,
        identity_id: &str,
        kind: CeremonyKind,
        nonce: &[u8],
    ) -> Result<ChallengeRecord, CeremonyError> {
        let row = sqlx::query_as::<_, ChallengeRow>(
            "SELECT user_id, nonce, created_at_ms, expires_at_ms FROM challenges
             WHERE user_id = ? AND kind = ?",
        )
        .bind(identity_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let record = match row {
            Some(row) => row.into_record(kind)?,
            None => return Err(CeremonyError::NoActiveChallenge),
        };

        if record.is_expired_at(Utc::now()) {
            // Purge only the record we looked at, not one issued since
            self.delete_matching(identity_id, kind, &record.nonce).await?;
            return Err(CeremonyError::ChallengeExpired);
        }

        if record.nonce.as_slice() != nonce {
            return Err(CeremonyError::ChallengeMismatch);
        }

        if self.delete_matching(identity_id, kind, nonce).await? == 0 {
            // Lost the race against another consume or a re-issue
            return Err(CeremonyError::NoActiveChallenge);
        }

        Ok(record)
    }

    async fn purge_expired(&self) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM challenges WHERE expires_at_ms <= ?")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
