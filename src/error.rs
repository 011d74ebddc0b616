//! # Error Handling
//!
//! Three layers of errors live here:
//! - [`StorageError`]: a challenge store or credential repository backend failed
//! - [`CeremonyError`]: everything the ceremony engine can report, grouped
//!   into [`ErrorCategory`] so callers can react per category
//! - [`AppError`]: the HTTP-facing error that turns any of the above into a
//!   JSON response
//!
//! ## Learning Points
//! - `thiserror` derives `Display` and `std::error::Error`
//! - `#[from]` lets `?` convert lower-level errors upward
//! - Security-relevant failures are logged differently from plain ones

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::webauthn::verifier::VerificationFailure;

/// Backend failures of the challenge store or credential repository
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLx errors (connection, query, constraint other than uniqueness)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored JSON columns (transports) could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A row holds a value the domain type can't represent
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// How a caller should treat a [`CeremonyError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Restart the ceremony; never retried automatically
    Challenge,
    /// Terminal for this attempt; the response is "not verified"
    Verification,
    /// Security relevant: log/alert separately from ordinary failures
    Integrity,
    /// Backend trouble, not caused by the client
    Storage,
}

/// Errors produced by the ceremony engine and its collaborators
#[derive(Error, Debug)]
pub enum CeremonyError {
    #[error("No active challenge for this ceremony")]
    NoActiveChallenge,

    #[error("Challenge expired")]
    ChallengeExpired,

    #[error("Challenge does not match the issued challenge")]
    ChallengeMismatch,

    #[error("Attestation invalid: {0}")]
    AttestationInvalid(#[source] VerificationFailure),

    #[error("Assertion invalid: {0}")]
    AssertionInvalid(#[source] VerificationFailure),

    /// The credential id is already registered (to this or another identity)
    #[error("Credential already registered")]
    DuplicateCredential,

    /// Counter update for a credential the repository doesn't know
    #[error("Unknown credential")]
    UnknownCredential,

    /// Credential absent, or owned by a different identity than the requester
    #[error("Credential is not registered to this identity")]
    CredentialNotRegistered,

    /// Signature counter did not advance: the credential may have been cloned
    #[error("Possible cloned credential (stored counter {stored}, reported {reported})")]
    PossibleCloneDetected { stored: u32, reported: u32 },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CeremonyError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CeremonyError::NoActiveChallenge
            | CeremonyError::ChallengeExpired
            | CeremonyError::ChallengeMismatch => ErrorCategory::Challenge,
            CeremonyError::AttestationInvalid(_) | CeremonyError::AssertionInvalid(_) => {
                ErrorCategory::Verification
            }
            CeremonyError::DuplicateCredential
            | CeremonyError::UnknownCredential
            | CeremonyError::CredentialNotRegistered
            | CeremonyError::PossibleCloneDetected { .. } => ErrorCategory::Integrity,
            CeremonyError::Storage(_) => ErrorCategory::Storage,
        }
    }
}

impl From<sqlx::Error> for CeremonyError {
    fn from(e: sqlx::Error) -> Self {
        CeremonyError::Storage(StorageError::Database(e))
    }
}

/// Application-wide error type returned by HTTP handlers
#[derive(Error, Debug)]
pub enum AppError {
    /// Database errors outside the ceremony stores (users, sessions setup)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Any failure reported by the ceremony engine
    #[error(transparent)]
    Ceremony(#[from] CeremonyError),

    /// Identity exists but has nothing to authenticate with
    #[error("No passkeys registered: {0}")]
    NoCredentialsRegistered(String),

    /// Resource not found errors (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request errors (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Not logged in, or no ceremony pinned to this session (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal server errors (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        AppError::Ceremony(CeremonyError::Storage(e))
    }
}

/// Map a ceremony failure onto (status, user-facing message)
///
/// Integrity failures are logged on the `security` target so they can be
/// routed to alerting. Clone detection is deliberately not presented as an
/// ordinary "try again" failure.
fn ceremony_response(e: &CeremonyError) -> (StatusCode, String) {
    match e.category() {
        ErrorCategory::Challenge => {
            tracing::info!("Ceremony challenge rejected: {}", e);
            (
                StatusCode::BAD_REQUEST,
                format!("{}. Please restart the ceremony.", e),
            )
        }
        ErrorCategory::Verification => {
            tracing::warn!("Ceremony verification failed: {}", e);
            (StatusCode::BAD_REQUEST, "Not verified".to_string())
        }
        ErrorCategory::Integrity => match e {
            CeremonyError::PossibleCloneDetected { stored, reported } => {
                tracing::error!(
                    target: "security",
                    stored,
                    reported,
                    "Signature counter regression, credential may be cloned"
                );
                (
                    StatusCode::FORBIDDEN,
                    "This passkey has been blocked for security reasons. Please contact support."
                        .to_string(),
                )
            }
            CeremonyError::DuplicateCredential => {
                tracing::warn!(target: "security", "Duplicate credential registration attempt");
                (StatusCode::CONFLICT, e.to_string())
            }
            CeremonyError::CredentialNotRegistered => {
                tracing::warn!(target: "security", "Assertion with unregistered or foreign credential");
                (
                    StatusCode::BAD_REQUEST,
                    "Authenticator is not registered with this site".to_string(),
                )
            }
            _ => {
                tracing::error!(target: "security", "Credential integrity error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        },
        ErrorCategory::Storage => {
            tracing::error!("Storage error: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
        }
    }
}

/// Convert AppError into an HTTP response
///
/// Detailed errors are logged; users only get a message that doesn't leak
/// internals. Body format: `{ "error": "..." }`
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Ceremony(e) => ceremony_response(e),
            AppError::NoCredentialsRegistered(_) | AppError::NotFound(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results using AppError
pub type AppResult<T> = Result<T, AppError>;
