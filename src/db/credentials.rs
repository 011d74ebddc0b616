//! # Credential Database Operations
//!
//! SQLite-backed [`CredentialRepository`].
//! Credentials contain the public keys used to verify authentication attempts.
//!
//! ## Security Note
//! `credential_id` carries a `UNIQUE` constraint over the whole table. The
//! global uniqueness check is the constraint itself, so there is no window
//! between "check" and "write" in which a second identity could slip in a
//! record with the same id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::models::{CredentialRecord, Transport};
use crate::db::CredentialRepository;
use crate::error::{CeremonyError, StorageError};

/// Row layout of the `credentials` table
#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    credential_id: Vec<u8>,
    user_id: String,
    public_key: Vec<u8>,
    algorithm: i64,
    counter: i64,
    /// JSON array, e.g. `["usb","nfc"]`
    transports: Option<String>,
    created_at: String,
    last_used_at: Option<String>,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StorageError::Corrupt(format!("Invalid timestamp '{}'", value)))
}

impl TryFrom<CredentialRow> for CredentialRecord {
    type Error = StorageError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        let transports: Vec<Transport> = match row.transports.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };
        let counter = u32::try_from(row.counter)
            .map_err(|_| StorageError::Corrupt(format!("Counter out of range: {}", row.counter)))?;

        Ok(CredentialRecord {
            credential_id: row.credential_id,
            identity_id: row.user_id,
            public_key: row.public_key,
            algorithm: row.algorithm,
            counter,
            transports,
            created_at: parse_timestamp(&row.created_at)?,
            last_used_at: row
                .last_used_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

const SELECT_COLUMNS: &str = "SELECT credential_id, user_id, public_key, algorithm, counter, \
     transports, created_at, last_used_at FROM credentials";

/// Credential repository persisted in the `credentials` table
#[derive(Debug, Clone)]
pub struct SqliteCredentialRepository {
    pool: SqlitePool,
}

impl SqliteCredentialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Total number of stored credentials
    pub async fn count(&self) -> Result<i64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credentials")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

#[async_trait]
impl CredentialRepository for SqliteCredentialRepository {
    async fn find_by_credential_id(
        &self,
        credential_id: &[u8],
    ) -> Result<Option<CredentialRecord>, StorageError> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "{} WHERE credential_id = ?",
            SELECT_COLUMNS
        ))
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(CredentialRecord::try_from).transpose()
    }

    async fn list_for_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<CredentialRecord>, StorageError> {
        let rows = sqlx::query_as::<_, CredentialRow>(&format!(
            "{} WHERE user_id = ? ORDER BY seq ASC",
            SELECT_COLUMNS
        ))
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CredentialRecord::try_from).collect()
    }

    async fn insert(&self, record: CredentialRecord) -> Result<(), CeremonyError> {
        let transports: Vec<Transport> = record
            .transports
            .iter()
            .copied()
            .filter(|t| *t != Transport::Unknown)
            .collect();
        let transports_json = serde_json::to_string(&transports).map_err(StorageError::from)?;

        let result = sqlx::query(
            "INSERT INTO credentials
             (credential_id, user_id, public_key, algorithm, counter, transports, created_at, last_used_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.credential_id)
        .bind(&record.identity_id)
        .bind(&record.public_key)
        .bind(record.algorithm)
        .bind(i64::from(record.counter))
        .bind(transports_json)
        .bind(record.created_at.to_rfc3339())
        .bind(record.last_used_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(CeremonyError::DuplicateCredential)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_counter(
        &self,
        credential_id: &[u8],
        new_counter: u32,
    ) -> Result<(), CeremonyError> {
        let now = Utc::now().to_rfc3339();

        // Compare-and-set: a concurrent finish that already advanced the
        // counter wins, the stale write is dropped
        let result = sqlx::query(
            "UPDATE credentials
             SET counter = ?, last_used_at = ?
             WHERE credential_id = ? AND (counter < ? OR counter = 0)",
        )
        .bind(i64::from(new_counter))
        .bind(now)
        .bind(credential_id)
        .bind(i64::from(new_counter))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let stored: Option<i64> =
            sqlx::query_scalar("SELECT counter FROM credentials WHERE credential_id = ?")
                .bind(credential_id)
                .fetch_optional(&self.pool)
                .await?;

        match stored {
            None => Err(CeremonyError::UnknownCredential),
            Some(stored) => Err(CeremonyError::PossibleCloneDetected {
                stored: u32::try_from(stored).map_err(|_| {
                    StorageError::Corrupt(format!("Counter out of range: {}", stored))
                })?,
                reported: new_counter,
            }),
        }
    }
}
