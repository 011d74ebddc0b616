//! ES256 verifier for passkeys registered with attestation conveyance `none`.
//!
//! Supports the algorithm every platform authenticator offers (ECDSA P-256 /
//! SHA-256). Attestation statements are not validated against trust roots:
//! the server asks for `none`, so `fmt: "none"` must carry an empty
//! statement and any other format is accepted on the strength of its
//! authenticator data alone.

use ciborium::value::Value;
use p256::ecdsa::{signature::Verifier as _, Signature};
use sha2::{Digest, Sha256};

use crate::db::models::CredentialRecord;
use crate::webauthn::authenticator_data::{cose_algorithm, decode_es256_key, AuthenticatorData};
use crate::webauthn::client_data::{ClientData, TYPE_CREATE, TYPE_GET};
use crate::webauthn::types::{AuthenticationResponse, RegistrationResponse, COSE_ALG_ES256};
use crate::webauthn::verifier::{
    Expectations, VerificationFailure, VerifiedAuthentication, VerifiedRegistration, Verifier,
};

/// Decoded top level of an attestation object
struct AttestationObject {
    fmt: String,
    att_stmt_empty: bool,
    auth_data: Vec<u8>,
}

impl AttestationObject {
    fn parse(bytes: &[u8]) -> Result<Self, VerificationFailure> {
        let malformed = || VerificationFailure::Malformed("attestation object".to_string());

        let value: Value = ciborium::from_reader(bytes).map_err(|_| malformed())?;
        let map = value.as_map().ok_or_else(malformed)?;
        let field = |name: &str| {
            map.iter()
                .find(|(k, _)| k.as_text() == Some(name))
                .map(|(_, v)| v)
        };

        let fmt = field("fmt")
            .and_then(Value::as_text)
            .ok_or_else(malformed)?
            .to_string();
        let att_stmt_empty = field("attStmt")
            .and_then(Value::as_map)
            .map(|m| m.is_empty())
            .ok_or_else(malformed)?;
        let auth_data = field("authData")
            .and_then(Value::as_bytes)
            .ok_or_else(malformed)?
            .clone();

        Ok(Self {
            fmt,
            att_stmt_empty,
            auth_data,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Es256Verifier;

impl Es256Verifier {
    pub fn new() -> Self {
        Self
    }
}

impl Verifier for Es256Verifier {
    fn verify_registration(
        &self,
        response: &RegistrationResponse,
        expected: &Expectations<'_>,
    ) -> Result<VerifiedRegistration, VerificationFailure> {
        ClientData::parse(&response.response.client_data_json)?.check(TYPE_CREATE, expected)?;

        let attestation = AttestationObject::parse(&response.response.attestation_object)?;
        if attestation.fmt == "none" && !attestation.att_stmt_empty {
            return Err(VerificationFailure::Malformed(
                "non-empty statement for attestation format none".to_string(),
            ));
        }

        let auth_data = AuthenticatorData::parse(&attestation.auth_data)?;
        auth_data.check_rp_id(expected.rp_id)?;
        if !auth_data.user_present() {
            return Err(VerificationFailure::UserNotPresent);
        }

        let user_verified = auth_data.user_verified();
        let attested = auth_data.attested_credential.ok_or_else(|| {
            VerificationFailure::Malformed("missing attested credential data".to_string())
        })?;
        if attested.credential_id != response.raw_id {
            return Err(VerificationFailure::CredentialIdMismatch);
        }

        let algorithm = cose_algorithm(&attested.public_key)?;
        if algorithm != COSE_ALG_ES256 {
            return Err(VerificationFailure::UnsupportedAlgorithm(algorithm));
        }
        decode_es256_key(&attested.public_key)?;

        Ok(VerifiedRegistration {
            credential_id: attested.credential_id,
            public_key: attested.public_key,
            algorithm,
            counter: auth_data.sign_count,
            transports: response.response.transports.clone(),
            user_verified,
        })
    }

    fn verify_authentication(
        &self,
        response: &AuthenticationResponse,
        expected: &Expectations<'_>,
        credential: &CredentialRecord,
    ) -> Result<VerifiedAuthentication, VerificationFailure> {
        if response.raw_id != credential.credential_id {
            return Err(VerificationFailure::CredentialIdMismatch);
        }

        let assertion = &response.response;
        ClientData::parse(&assertion.client_data_json)?.check(TYPE_GET, expected)?;

        let auth_data = AuthenticatorData::parse(&assertion.authenticator_data)?;
        auth_data.check_rp_id(expected.rp_id)?;
        if !auth_data.user_present() {
            return Err(VerificationFailure::UserNotPresent);
        }

        if credential.algorithm != COSE_ALG_ES256 {
            return Err(VerificationFailure::UnsupportedAlgorithm(credential.algorithm));
        }
        let key = decode_es256_key(&credential.public_key)?;
        let signature = Signature::from_der(&assertion.signature)
            .map_err(|_| VerificationFailure::Malformed("signature".to_string()))?;

        let mut signed = assertion.authenticator_data.clone();
        signed.extend_from_slice(&Sha256::digest(&assertion.client_data_json));
        key.verify(&signed, &signature)
            .map_err(|_| VerificationFailure::BadSignature)?;

        Ok(VerifiedAuthentication {
            credential_id: response.raw_id.clone(),
            new_counter: auth_data.sign_count,
            user_verified: auth_data.user_verified(),
        })
    }
}
