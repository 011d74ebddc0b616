//! # Verifier Boundary
//!
//! The ceremony engine never does cryptography itself. It hands the client's
//! response plus what it expects (challenge, origin, RP ID) to a [`Verifier`]
//! and gets back either the verified facts or a [`VerificationFailure`].
//!
//! ## Why a trait?
//! - The production implementation ([`Es256Verifier`](super::es256::Es256Verifier))
//!   can be swapped without touching ceremony logic
//! - Engine tests inject a fake verifier and need no cryptographic fixtures
//!
//! Implementations must be pure: no storage, no network, no hidden state.

use std::sync::Arc;
use thiserror::Error;

use crate::db::models::{CredentialRecord, Transport};
use crate::error::CeremonyError;
use crate::webauthn::engine::RelyingParty;
use crate::webauthn::types::{AuthenticationResponse, RegistrationResponse};

/// Why a response failed verification
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    #[error("malformed {0}")]
    Malformed(String),

    #[error("unexpected client data type '{0}'")]
    WrongType(String),

    #[error("challenge mismatch")]
    ChallengeMismatch,

    #[error("origin mismatch: '{0}'")]
    OriginMismatch(String),

    #[error("RP ID hash mismatch")]
    RpIdMismatch,

    #[error("user presence flag not set")]
    UserNotPresent,

    #[error("credential id mismatch")]
    CredentialIdMismatch,

    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(i64),

    #[error("signature verification failed")]
    BadSignature,
}

/// What the server expects the response to be bound to
#[derive(Debug, Clone, Copy)]
pub struct Expectations<'a> {
    pub challenge: &'a [u8],
    pub origin: &'a str,
    pub rp_id: &'a str,
}

/// Facts established by a successful registration verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRegistration {
    pub credential_id: Vec<u8>,
    /// COSE_Key bytes
    pub public_key: Vec<u8>,
    pub algorithm: i64,
    /// Initial signature counter
    pub counter: u32,
    pub transports: Vec<Transport>,
    pub user_verified: bool,
}

/// Facts established by a successful assertion verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAuthentication {
    pub credential_id: Vec<u8>,
    /// Counter reported by the authenticator for this assertion
    pub new_counter: u32,
    pub user_verified: bool,
}

/// The cryptographic collaborator
pub trait Verifier: Send + Sync {
    fn verify_registration(
        &self,
        response: &RegistrationResponse,
        expected: &Expectations<'_>,
    ) -> Result<VerifiedRegistration, VerificationFailure>;

    /// `credential` is the stored record the engine resolved for the response
    fn verify_authentication(
        &self,
        response: &AuthenticationResponse,
        expected: &Expectations<'_>,
        credential: &CredentialRecord,
    ) -> Result<VerifiedAuthentication, VerificationFailure>;
}

/// Calls the [`Verifier`] with configured origin/RP ID and maps failures into
/// the ceremony error taxonomy
#[derive(Clone)]
pub struct VerifierAdapter {
    verifier: Arc<dyn Verifier>,
    origin: String,
    rp_id: String,
}

impl VerifierAdapter {
    pub fn new(verifier: Arc<dyn Verifier>, rp: &RelyingParty) -> Self {
        Self {
            verifier,
            origin: rp.origin.clone(),
            rp_id: rp.id.clone(),
        }
    }

    fn expectations<'a>(&'a self, challenge: &'a [u8]) -> Expectations<'a> {
        Expectations {
            challenge,
            origin: &self.origin,
            rp_id: &self.rp_id,
        }
    }

    pub fn verify_registration(
        &self,
        response: &RegistrationResponse,
        expected_challenge: &[u8],
    ) -> Result<VerifiedRegistration, CeremonyError> {
        let mut verified = self
            .verifier
            .verify_registration(response, &self.expectations(expected_challenge))
            .map_err(|failure| {
                tracing::debug!(%failure, "Registration response rejected");
                CeremonyError::AttestationInvalid(failure)
            })?;

        normalize_transports(&mut verified.transports);
        Ok(verified)
    }

    pub fn verify_authentication(
        &self,
        response: &AuthenticationResponse,
        expected_challenge: &[u8],
        credential: &CredentialRecord,
    ) -> Result<VerifiedAuthentication, CeremonyError> {
        let verified = self
            .verifier
            .verify_authentication(response, &self.expectations(expected_challenge), credential)
            .map_err(|failure| {
                tracing::debug!(%failure, "Authentication response rejected");
                CeremonyError::AssertionInvalid(failure)
            })?;

        // The verifier must have vouched for the credential we looked up
        if verified.credential_id != credential.credential_id {
            return Err(CeremonyError::AssertionInvalid(
                VerificationFailure::CredentialIdMismatch,
            ));
        }

        Ok(verified)
    }
}

impl std::fmt::Debug for VerifierAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifierAdapter")
            .field("origin", &self.origin)
            .field("rp_id", &self.rp_id)
            .finish()
    }
}

/// Drop unknown hints and duplicates, keeping first-seen order
fn normalize_transports(transports: &mut Vec<Transport>) {
    let mut seen = Vec::with_capacity(transports.len());
    transports.retain(|t| {
        if *t == Transport::Unknown || seen.contains(t) {
            false
        } else {
            seen.push(*t);
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_transports() {
        let mut transports = vec![
            Transport::Usb,
            Transport::Unknown,
            Transport::Nfc,
            Transport::Usb,
        ];
        normalize_transports(&mut transports);
        assert_eq!(transports, vec![Transport::Usb, Transport::Nfc]);
    }
}
