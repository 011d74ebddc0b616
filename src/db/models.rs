//! # Database Models
//!
//! This module defines the records the ceremony engine reads and writes:
//! identities, registered credentials and pending challenges.
//!
//! ## Key Concepts
//! - **Identity**: the principal being authenticated (owned by provisioning, read-only here)
//! - **CredentialRecord**: a registered public key bound to exactly one identity
//! - **ChallengeRecord**: a short-lived, single-use nonce for one ceremony

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stable principal that can register and use passkeys
///
/// ## Derive Macros Explained
/// - `Serialize`/`Deserialize`: JSON for API responses
/// - `sqlx::FromRow`: maps a row of the `users` table onto this struct
///
/// Timestamps are RFC3339 strings because SQLite stores them as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Identity {
    /// Opaque unique identifier (UUID v4)
    /// Sent to the authenticator as the WebAuthn user handle
    pub id: String,

    /// Human-readable handle used for lookup
    pub username: String,

    /// Name shown by the authenticator during passkey creation
    pub display_name: String,

    /// When the identity was created (RFC3339 timestamp)
    pub created_at: String,

    /// When the identity was last updated (RFC3339 timestamp)
    pub updated_at: String,
}

impl Identity {
    /// Create a new identity with a generated id and timestamps
    pub fn new(username: String, display_name: String) -> Self {
        let now = Utc::now().to_rfc3339();

        Self {
            id: Uuid::new_v4().to_string(),
            username,
            display_name,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// Which ceremony a challenge belongs to
///
/// A registration nonce can never satisfy an authentication verify call and
/// vice versa: the kind is part of the challenge key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

impl CeremonyKind {
    /// Column value used in the `challenges` table
    pub fn as_str(&self) -> &'static str {
        match self {
            CeremonyKind::Registration => "registration",
            CeremonyKind::Authentication => "authentication",
        }
    }
}

impl std::fmt::Display for CeremonyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport hint reported by an authenticator
///
/// Advisory only: the client uses these to pick how to reach the
/// authenticator, the server never enforces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    Usb,
    Nfc,
    Ble,
    Internal,
    Hybrid,
    SmartCard,
    /// Anything a newer browser reports that we don't know about yet
    #[serde(other)]
    Unknown,
}

/// Pending ceremony challenge
///
/// ## Challenge Lifecycle
/// 1. Options requested → record issued (any older one for the same
///    identity and kind is replaced)
/// 2. Client signs over the nonce with its authenticator
/// 3. Verify call → record consumed exactly once
/// 4. Never consumed → expires and is purged by the janitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    /// Identity the ceremony runs for
    pub identity_id: String,

    /// Which ceremony this nonce belongs to
    pub kind: CeremonyKind,

    /// Random nonce (32 bytes from the OS CSPRNG)
    pub nonce: Vec<u8>,

    pub created_at: DateTime<Utc>,

    /// `created_at + TTL`; the record is unusable from this instant on
    pub expires_at: DateTime<Utc>,
}

impl ChallengeRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A registered passkey
///
/// ## What is stored?
/// - **Public Key**: COSE_Key bytes plus the COSE algorithm identifier
/// - **Counter**: signature counter used for clone detection
/// - **Transports**: hints passed back to the client in allow/exclude lists
///
/// Only the public key is ever stored. The private key stays on the
/// user's authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Credential id chosen by the authenticator, unique across all identities
    pub credential_id: Vec<u8>,

    /// Identity that registered this credential
    pub identity_id: String,

    /// COSE_Key encoded public key
    pub public_key: Vec<u8>,

    /// COSE algorithm identifier (-7 = ES256)
    pub algorithm: i64,

    /// Last signature counter seen; 0 means the authenticator doesn't count
    pub counter: u32,

    pub transports: Vec<Transport>,

    pub created_at: DateTime<Utc>,

    /// Stamped on every successful authentication
    pub last_used_at: Option<DateTime<Utc>>,
}
