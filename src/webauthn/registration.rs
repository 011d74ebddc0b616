//! # Passkey Registration Logic
//!
//! Server-side half of creating a new passkey credential.
//! Registration is a two-step process: begin and finish.
//!
//! ## Registration Flow
//! 1. **Begin**: list existing credentials → issue challenge → return options
//! 2. **Finish**: consume challenge → verify attestation → store public key
//!
//! ## Security Concepts
//! - **Challenge**: Random value the authenticator signs over, single-use
//! - **Exclusion list**: Stops an authenticator from registering twice for
//!   the same identity
//! - **Global uniqueness**: A credential id can belong to one identity only;
//!   a collision is rejected, never reassigned

use chrono::Utc;

use crate::db::models::{CeremonyKind, CredentialRecord, Identity};
use crate::error::CeremonyError;
use crate::webauthn::engine::CeremonyEngine;
use crate::webauthn::types::{
    AttestationConveyance, AuthenticatorSelection, CredentialDescriptor, CredentialParameter,
    RegistrationOptions, RegistrationResponse, RelyingPartyEntity, ResidentKeyRequirement,
    UserEntity, UserVerificationRequirement, COSE_ALG_ES256, PUBLIC_KEY_TYPE,
};
use crate::webauthn::verifier::VerifiedRegistration;

impl CeremonyEngine {
    /// Start registering a passkey for `identity`
    ///
    /// ## Flow
    /// 1. Enumerate the identity's credentials into the exclusion list
    /// 2. Issue a registration challenge (replacing any earlier one)
    /// 3. Return options for `navigator.credentials.create()`
    ///
    /// ## Errors
    /// - Storage: listing or issuing failed
    #[tracing::instrument(skip_all, fields(identity = %identity.id))]
    pub async fn begin_registration(
        &self,
        identity: &Identity,
    ) -> Result<RegistrationOptions, CeremonyError> {
        let exclude_credentials: Vec<CredentialDescriptor> = self
            .credentials
            .list_for_identity(&identity.id)
            .await?
            .iter()
            .map(CredentialDescriptor::from)
            .collect();

        let challenge = self
            .challenges
            .issue(&identity.id, CeremonyKind::Registration)
            .await?;

        tracing::debug!(
            excluded = exclude_credentials.len(),
            "Issued registration challenge"
        );

        Ok(RegistrationOptions {
            rp: RelyingPartyEntity {
                name: self.rp.name.clone(),
                id: self.rp.id.clone(),
            },
            user: UserEntity {
                id: identity.id.as_bytes().to_vec(),
                name: identity.username.clone(),
                display_name: identity.display_name.clone(),
            },
            challenge: challenge.nonce,
            pub_key_cred_params: vec![CredentialParameter {
                type_: PUBLIC_KEY_TYPE.to_string(),
                alg: COSE_ALG_ES256,
            }],
            timeout: self.timeout_ms(),
            exclude_credentials,
            authenticator_selection: AuthenticatorSelection {
                resident_key: ResidentKeyRequirement::Preferred,
                user_verification: UserVerificationRequirement::Preferred,
            },
            attestation: AttestationConveyance::None,
        })
    }

    /// Complete registration with the credential the authenticator created
    ///
    /// ## Flow
    /// 1. Consume the registration challenge the client data claims to answer
    /// 2. Verify the attestation against that challenge, origin and RP ID
    /// 3. Insert the new credential record
    ///
    /// ## Errors
    /// - NoActiveChallenge / ChallengeExpired / ChallengeMismatch
    /// - AttestationInvalid: client data unreadable or verification failed
    /// - DuplicateCredential: the credential id is already registered anywhere
    ///
    /// The challenge is spent even when a later step fails; the client has to
    /// begin again.
    #[tracing::instrument(skip_all, fields(identity = %identity.id))]
    pub async fn finish_registration(
        &self,
        identity: &Identity,
        response: &RegistrationResponse,
    ) -> Result<VerifiedRegistration, CeremonyError> {
        let claimed = response
            .claimed_challenge()
            .map_err(CeremonyError::AttestationInvalid)?;

        let challenge = self
            .challenges
            .consume(&identity.id, CeremonyKind::Registration, &claimed)
            .await?;

        let verified = self
            .verifier
            .verify_registration(response, &challenge.nonce)?;

        let now = Utc::now();
        self.credentials
            .insert(CredentialRecord {
                credential_id: verified.credential_id.clone(),
                identity_id: identity.id.clone(),
                public_key: verified.public_key.clone(),
                algorithm: verified.algorithm,
                counter: verified.counter,
                transports: verified.transports.clone(),
                created_at: now,
                last_used_at: None,
            })
            .await
            .inspect_err(|e| {
                if matches!(e, CeremonyError::DuplicateCredential) {
                    tracing::warn!(
                        target: "security",
                        identity = %identity.id,
                        "Registration rejected: credential id already registered"
                    );
                }
            })?;

        tracing::info!(counter = verified.counter, "Registered passkey");
        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::CredentialRepository;
    use crate::error::CeremonyError;
    use crate::webauthn::engine::tests::{harness, identity, registration_response};
    use crate::webauthn::verifier::VerificationFailure;

    #[tokio::test]
    async fn test_options_carry_preferences() {
        let h = harness();
        let u1 = identity("u1");

        let options = h.engine.begin_registration(&u1).await.unwrap();
        let value = serde_json::to_value(&options).unwrap();

        assert_eq!(value["rp"]["id"], "localhost");
        assert_eq!(value["user"]["name"], "u1@example.com");
        assert_eq!(value["timeout"], 60_000);
        assert_eq!(value["pubKeyCredParams"][0]["alg"], -7);
        assert_eq!(value["authenticatorSelection"]["residentKey"], "preferred");
        assert_eq!(value["authenticatorSelection"]["userVerification"], "preferred");
        assert_eq!(value["attestation"], "none");
        assert_eq!(options.user.id, b"u1".to_vec());
    }

    #[tokio::test]
    async fn test_exclusion_list_names_existing_credentials() {
        let h = harness();
        let u1 = identity("u1");

        let options = h.engine.begin_registration(&u1).await.unwrap();
        h.engine
            .finish_registration(&u1, &registration_response(b"first", &options.challenge))
            .await
            .unwrap();

        let options = h.engine.begin_registration(&u1).await.unwrap();
        assert_eq!(options.exclude_credentials.len(), 1);
        assert_eq!(options.exclude_credentials[0].id, b"first".to_vec());
        // Unknown transport hints were dropped before storage
        assert_eq!(
            options.exclude_credentials[0].transports,
            vec![crate::db::models::Transport::Usb]
        );
    }

    #[tokio::test]
    async fn test_duplicate_credential_across_identities() {
        let h = harness();
        let u1 = identity("u1");
        let u2 = identity("u2");

        let options = h.engine.begin_registration(&u1).await.unwrap();
        h.engine
            .finish_registration(&u1, &registration_response(b"shared", &options.challenge))
            .await
            .unwrap();

        let options = h.engine.begin_registration(&u2).await.unwrap();
        let result = h
            .engine
            .finish_registration(&u2, &registration_response(b"shared", &options.challenge))
            .await;

        assert!(matches!(result, Err(CeremonyError::DuplicateCredential)));
        assert_eq!(h.credentials.len(), 1);
        let owner = h
            .credentials
            .find_by_credential_id(b"shared")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(owner.identity_id, "u1");
    }

    #[tokio::test]
    async fn test_finish_without_begin() {
        let h = harness();
        let result = h
            .engine
            .finish_registration(&identity("u1"), &registration_response(b"c", &[0; 32]))
            .await;
        assert!(matches!(result, Err(CeremonyError::NoActiveChallenge)));
    }

    #[tokio::test]
    async fn test_wrong_challenge_is_mismatch() {
        let h = harness();
        let u1 = identity("u1");
        h.engine.begin_registration(&u1).await.unwrap();

        let result = h
            .engine
            .finish_registration(&u1, &registration_response(b"c", &[0; 32]))
            .await;
        assert!(matches!(result, Err(CeremonyError::ChallengeMismatch)));
    }

    #[tokio::test]
    async fn test_invalid_attestation_spends_challenge() {
        let h = harness();
        let u1 = identity("u1");
        let options = h.engine.begin_registration(&u1).await.unwrap();

        let mut response = registration_response(b"c", &options.challenge);
        response.response.attestation_object = b"bogus".to_vec();
        let result = h.engine.finish_registration(&u1, &response).await;
        assert!(matches!(
            result,
            Err(CeremonyError::AttestationInvalid(VerificationFailure::Malformed(_)))
        ));
        assert!(h.credentials.is_empty());

        // Retrying with a good response needs a new challenge
        let retry = h
            .engine
            .finish_registration(&u1, &registration_response(b"c", &options.challenge))
            .await;
        assert!(matches!(retry, Err(CeremonyError::NoActiveChallenge)));
    }

    #[tokio::test]
    async fn test_unreadable_client_data() {
        let h = harness();
        let u1 = identity("u1");
        h.engine.begin_registration(&u1).await.unwrap();

        let mut response = registration_response(b"c", &[0; 32]);
        response.response.client_data_json = b"not json".to_vec();
        let result = h.engine.finish_registration(&u1, &response).await;
        assert!(matches!(result, Err(CeremonyError::AttestationInvalid(_))));
    }

    #[tokio::test]
    async fn test_reissue_invalidates_first_nonce() {
        let h = harness();
        let u1 = identity("u1");

        let first = h.engine.begin_registration(&u1).await.unwrap();
        let second = h.engine.begin_registration(&u1).await.unwrap();
        assert_ne!(first.challenge, second.challenge);

        let stale = h
            .engine
            .finish_registration(&u1, &registration_response(b"c", &first.challenge))
            .await;
        assert!(matches!(stale, Err(CeremonyError::ChallengeMismatch)));

        h.engine
            .finish_registration(&u1, &registration_response(b"c", &second.challenge))
            .await
            .unwrap();
    }
}
