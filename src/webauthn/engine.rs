//! # Ceremony Engine
//!
//! Orchestrates the registration and authentication ceremonies on top of the
//! challenge store, the credential repository and the verifier.
//!
//! ## State Machine
//! ```text
//! Idle ──begin_*──▶ OptionsIssued ──finish_* ok──▶ Verified
//!                        │
//!                        └──finish_* error──▶ Failed
//! ```
//! `OptionsIssued` exists only as an active challenge record in the store.
//! The engine keeps no per-ceremony state of its own, so any number of
//! server instances can share the same stores.
//!
//! The ceremony operations themselves live in `registration.rs` and
//! `authentication.rs`.

use std::sync::Arc;
use std::time::Duration;

use crate::db::{ChallengeStore, CredentialRepository};
use crate::error::CeremonyError;
use crate::webauthn::verifier::{Verifier, VerifierAdapter};

/// Relying party settings that every ceremony is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    /// RP ID: the domain credentials are scoped to (e.g. "example.com")
    pub id: String,
    /// Human-readable name shown by authenticators
    pub name: String,
    /// Exact origin the browser must report (e.g. "https://example.com")
    pub origin: String,
}

pub struct CeremonyEngine {
    pub(crate) rp: RelyingParty,
    pub(crate) challenges: Arc<dyn ChallengeStore>,
    pub(crate) credentials: Arc<dyn CredentialRepository>,
    pub(crate) verifier: VerifierAdapter,
}

impl CeremonyEngine {
    pub fn new(
        rp: RelyingParty,
        challenges: Arc<dyn ChallengeStore>,
        credentials: Arc<dyn CredentialRepository>,
        verifier: Arc<dyn Verifier>,
    ) -> Self {
        let verifier = VerifierAdapter::new(verifier, &rp);
        Self {
            rp,
            challenges,
            credentials,
            verifier,
        }
    }

    pub fn relying_party(&self) -> &RelyingParty {
        &self.rp
    }

    pub fn challenges(&self) -> &Arc<dyn ChallengeStore> {
        &self.challenges
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialRepository> {
        &self.credentials
    }

    /// Client-side timeout advertised in options, matching the challenge TTL
    pub(crate) fn timeout_ms(&self) -> u64 {
        u64::try_from(self.challenges.ttl().as_millis()).unwrap_or(u64::MAX)
    }

    /// Challenge lifetime, for callers that want to tell users how long they have
    pub fn challenge_ttl(&self) -> Duration {
        self.challenges.ttl()
    }
}

impl std::fmt::Debug for CeremonyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CeremonyEngine")
            .field("rp", &self.rp)
            .field("verifier", &self.verifier)
            .finish()
    }
}

/// Clone detection on the signature counter
///
/// The reported counter must be strictly greater than the stored one. The
/// only exception is an authenticator that doesn't implement counters, which
/// reports 0 every time: stored 0 and reported 0 passes.
pub(crate) fn check_counter(stored: u32, reported: u32) -> Result<(), CeremonyError> {
    if stored == 0 && reported == 0 {
        return Ok(());
    }
    if reported > stored {
        return Ok(());
    }
    Err(CeremonyError::PossibleCloneDetected { stored, reported })
}
