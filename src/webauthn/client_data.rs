//! `clientDataJSON` parsing.
//!
//! The browser (not the authenticator) produces this JSON and the
//! authenticator signs over its hash. It names the ceremony type, the
//! challenge the page passed in, and the origin the page ran on.

use serde::Deserialize;

use crate::webauthn::b64;
use crate::webauthn::verifier::{Expectations, VerificationFailure};

pub const TYPE_CREATE: &str = "webauthn.create";
pub const TYPE_GET: &str = "webauthn.get";

#[derive(Debug, Clone, Deserialize)]
pub struct ClientData {
    #[serde(rename = "type")]
    pub type_: String,

    /// base64url of the challenge bytes
    pub challenge: String,

    pub origin: String,

    #[serde(rename = "crossOrigin", default)]
    pub cross_origin: bool,
}

impl ClientData {
    pub fn parse(bytes: &[u8]) -> Result<Self, VerificationFailure> {
        serde_json::from_slice(bytes)
            .map_err(|e| VerificationFailure::Malformed(format!("client data: {}", e)))
    }

    pub fn challenge_bytes(&self) -> Result<Vec<u8>, VerificationFailure> {
        b64::decode(&self.challenge)
            .map_err(|_| VerificationFailure::Malformed("client data challenge".to_string()))
    }

    /// Check ceremony type, challenge and origin against what the server expects
    pub fn check(
        &self,
        expected_type: &str,
        expected: &Expectations<'_>,
    ) -> Result<(), VerificationFailure> {
        if self.type_ != expected_type {
            return Err(VerificationFailure::WrongType(self.type_.clone()));
        }
        if self.challenge_bytes()? != expected.challenge {
            return Err(VerificationFailure::ChallengeMismatch);
        }
        if self.origin != expected.origin {
            return Err(VerificationFailure::OriginMismatch(self.origin.clone()));
        }
        Ok(())
    }
}
