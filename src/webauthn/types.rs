//! # WebAuthn API Types
//!
//! Request/response types exchanged with the browser. Field names follow the
//! JSON shapes of `PublicKeyCredentialCreationOptions`,
//! `PublicKeyCredentialRequestOptions` and the serialized `PublicKeyCredential`
//! so a page can pass them to `navigator.credentials` with only base64url
//! conversion.
//!
//! ## API Flow
//! Each ceremony has two steps: start and finish
//! - Start: server issues a challenge, client receives options
//! - Finish: client sends the authenticator's response, server verifies it

use serde::{Deserialize, Serialize};

use crate::db::models::{CredentialRecord, Transport};
use crate::webauthn::b64;
use crate::webauthn::client_data::ClientData;
use crate::webauthn::verifier::VerificationFailure;

/// Only credential type WebAuthn defines
pub const PUBLIC_KEY_TYPE: &str = "public-key";

/// COSE algorithm identifier for ECDSA P-256 with SHA-256
pub const COSE_ALG_ES256: i64 = -7;

fn public_key_type() -> String {
    PUBLIC_KEY_TYPE.to_string()
}

/// Request to start passkey registration
///
/// ## Example JSON
/// ```json
/// { "username": "alice", "display_name": "Alice Smith" }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationStartRequest {
    pub username: String,
    #[serde(default)]
    pub display_name: String,
}

/// Request to start passkey authentication
///
/// ## Example JSON
/// ```json
/// { "username": "alice" }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthenticationStartRequest {
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationRequirement {
    Required,
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidentKeyRequirement {
    Required,
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyance {
    None,
    Indirect,
    Direct,
    Enterprise,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingPartyEntity {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// User handle: the identity id as bytes
    #[serde(with = "b64")]
    pub id: Vec<u8>,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialParameter {
    #[serde(rename = "type")]
    pub type_: String,
    pub alg: i64,
}

/// Reference to a credential in allow/exclude lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type", default = "public_key_type")]
    pub type_: String,
    #[serde(with = "b64")]
    pub id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<Transport>,
}

impl From<&CredentialRecord> for CredentialDescriptor {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            type_: public_key_type(),
            id: record.credential_id.clone(),
            transports: record.transports.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    pub resident_key: ResidentKeyRequirement,
    pub user_verification: UserVerificationRequirement,
}

/// Options for `navigator.credentials.create()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOptions {
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    #[serde(with = "b64")]
    pub challenge: Vec<u8>,
    pub pub_key_cred_params: Vec<CredentialParameter>,
    /// Milliseconds
    pub timeout: u64,
    /// Credentials the identity already owns; the authenticator must not
    /// create a second one for them
    pub exclude_credentials: Vec<CredentialDescriptor>,
    pub authenticator_selection: AuthenticatorSelection,
    pub attestation: AttestationConveyance,
}

/// Options for `navigator.credentials.get()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    #[serde(with = "b64")]
    pub challenge: Vec<u8>,
    /// Milliseconds
    pub timeout: u64,
    pub rp_id: String,
    /// Only these credentials may answer the challenge
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub user_verification: UserVerificationRequirement,
}

/// `response` member of a credential returned by `navigator.credentials.create()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponse {
    #[serde(rename = "clientDataJSON", with = "b64")]
    pub client_data_json: Vec<u8>,
    /// CBOR map with `fmt`, `attStmt` and `authData`
    #[serde(with = "b64")]
    pub attestation_object: Vec<u8>,
    /// Result of `getTransports()`
    #[serde(default)]
    pub transports: Vec<Transport>,
}

/// Credential created by the authenticator, as posted to the finish endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    /// base64url form of `raw_id`
    pub id: String,
    #[serde(with = "b64")]
    pub raw_id: Vec<u8>,
    pub response: AttestationResponse,
    #[serde(rename = "type", default = "public_key_type")]
    pub type_: String,
}

impl RegistrationResponse {
    /// Challenge the client claims to answer, read from the client data
    pub fn claimed_challenge(&self) -> Result<Vec<u8>, VerificationFailure> {
        ClientData::parse(&self.response.client_data_json)?.challenge_bytes()
    }
}

/// `response` member of a credential returned by `navigator.credentials.get()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    #[serde(rename = "clientDataJSON", with = "b64")]
    pub client_data_json: Vec<u8>,
    #[serde(with = "b64")]
    pub authenticator_data: Vec<u8>,
    /// DER-encoded signature over `authenticatorData || SHA-256(clientDataJSON)`
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
    #[serde(default, with = "b64::option", skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<Vec<u8>>,
}

/// Assertion produced by the authenticator, as posted to the finish endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResponse {
    pub id: String,
    #[serde(with = "b64")]
    pub raw_id: Vec<u8>,
    pub response: AssertionResponse,
    #[serde(rename = "type", default = "public_key_type")]
    pub type_: String,
}

impl AuthenticationResponse {
    /// Challenge the client claims to answer, read from the client data
    pub fn claimed_challenge(&self) -> Result<Vec<u8>, VerificationFailure> {
        ClientData::parse(&self.response.client_data_json)?.challenge_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_response_from_browser_json() {
        let value = json!({
            "id": "AQID",
            "rawId": "AQID",
            "type": "public-key",
            "response": {
                "clientDataJSON": b64::encode(br#"{"type":"webauthn.create","challenge":"BwcH","origin":"http://localhost:8080"}"#),
                "attestationObject": "oA",
                "transports": ["internal", "hybrid"]
            },
            "clientExtensionResults": {},
            "authenticatorAttachment": "platform"
        });

        let response: RegistrationResponse = serde_json::from_value(value).unwrap();
        assert_eq!(response.raw_id, vec![1, 2, 3]);
        assert_eq!(response.response.attestation_object, vec![0xa0]);
        assert_eq!(
            response.response.transports,
            vec![Transport::Internal, Transport::Hybrid]
        );
        assert_eq!(response.claimed_challenge().unwrap(), vec![7, 7, 7]);
    }

    #[test]
    fn test_assertion_user_handle_optional() {
        let value = json!({
            "id": "AQID",
            "rawId": "AQID",
            "type": "public-key",
            "response": {
                "clientDataJSON": "e30",
                "authenticatorData": "AA",
                "signature": "AA",
                "userHandle": null
            }
        });

        let response: AuthenticationResponse = serde_json::from_value(value).unwrap();
        assert!(response.response.user_handle.is_none());
        assert!(response.claimed_challenge().is_err());
    }

    #[test]
    fn test_options_serialize_camel_case() {
        let options = AuthenticationOptions {
            challenge: vec![0xff; 4],
            timeout: 60_000,
            rp_id: "localhost".into(),
            allow_credentials: vec![CredentialDescriptor {
                type_: public_key_type(),
                id: vec![1],
                transports: vec![],
            }],
            user_verification: UserVerificationRequirement::Preferred,
        };

        let value = serde_json::to_value(&options).unwrap();
        assert_eq!(value["rpId"], "localhost");
        assert_eq!(value["challenge"], "_____w");
        assert_eq!(value["userVerification"], "preferred");
        assert_eq!(value["allowCredentials"][0]["type"], "public-key");
        assert!(value["allowCredentials"][0].get("transports").is_none());
    }
}
