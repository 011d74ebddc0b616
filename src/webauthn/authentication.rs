//! # Passkey Authentication Logic
//!
//! Server-side half of signing in with an existing passkey.
//!
//! ## Authentication Flow
//! 1. **Begin**: build the allow-list → issue challenge → return options
//! 2. **Finish**: resolve credential → consume challenge → verify assertion →
//!    counter check → persist counter
//!
//! ## Signature Counter
//! Authenticators bump a counter on every assertion. If the value we see goes
//! backwards, two copies of the same private key are probably in use, so the
//! attempt fails with `PossibleCloneDetected` even though the signature is good.

use crate::db::models::{CeremonyKind, Identity};
use crate::error::CeremonyError;
use crate::webauthn::engine::{check_counter, CeremonyEngine};
use crate::webauthn::types::{
    AuthenticationOptions, AuthenticationResponse, CredentialDescriptor,
    UserVerificationRequirement,
};
use crate::webauthn::verifier::VerifiedAuthentication;

impl CeremonyEngine {
    /// Start authenticating `identity`
    ///
    /// An empty `allow_credentials` list is not an error here: the caller
    /// decides how to report an identity without passkeys. A challenge is
    /// still issued.
    #[tracing::instrument(skip_all, fields(identity = %identity.id))]
    pub async fn begin_authentication(
        &self,
        identity: &Identity,
    ) -> Result<AuthenticationOptions, CeremonyError> {
        let allow_credentials: Vec<CredentialDescriptor> = self
            .credentials
            .list_for_identity(&identity.id)
            .await?
            .iter()
            .map(CredentialDescriptor::from)
            .collect();

        let challenge = self
            .challenges
            .issue(&identity.id, CeremonyKind::Authentication)
            .await?;

        tracing::debug!(
            allowed = allow_credentials.len(),
            "Issued authentication challenge"
        );

        Ok(AuthenticationOptions {
            challenge: challenge.nonce,
            timeout: self.timeout_ms(),
            rp_id: self.rp.id.clone(),
            allow_credentials,
            user_verification: UserVerificationRequirement::Preferred,
        })
    }

    /// Complete authentication with the authenticator's assertion
    ///
    /// ## Flow
    /// 1. Resolve the credential; it must exist and belong to `identity`
    /// 2. Consume the authentication challenge
    /// 3. Verify the assertion against the stored public key
    /// 4. Clone detection on the signature counter
    /// 5. Persist the new counter
    ///
    /// ## Errors
    /// - CredentialNotRegistered: unknown id, or owned by someone else
    /// - NoActiveChallenge / ChallengeExpired / ChallengeMismatch
    /// - AssertionInvalid: client data unreadable or verification failed
    /// - PossibleCloneDetected: counter did not advance (stored counter kept)
    #[tracing::instrument(skip_all, fields(identity = %identity.id))]
    pub async fn finish_authentication(
        &self,
        identity: &Identity,
        response: &AuthenticationResponse,
    ) -> Result<VerifiedAuthentication, CeremonyError> {
        let credential = match self
            .credentials
            .find_by_credential_id(&response.raw_id)
            .await?
        {
            Some(credential) if credential.identity_id == identity.id => credential,
            Some(_) => {
                tracing::warn!(
                    target: "security",
                    identity = %identity.id,
                    "Assertion presented a credential owned by another identity"
                );
                return Err(CeremonyError::CredentialNotRegistered);
            }
            None => return Err(CeremonyError::CredentialNotRegistered),
        };

        let claimed = response
            .claimed_challenge()
            .map_err(CeremonyError::AssertionInvalid)?;

        let challenge = self
            .challenges
            .consume(&identity.id, CeremonyKind::Authentication, &claimed)
            .await?;

        let verified = self
            .verifier
            .verify_authentication(response, &challenge.nonce, &credential)?;

        check_counter(credential.counter, verified.new_counter).inspect_err(|_| {
            tracing::error!(
                target: "security",
                identity = %identity.id,
                stored = credential.counter,
                reported = verified.new_counter,
                "Signature counter did not advance: possible cloned authenticator"
            );
        })?;

        self.credentials
            .update_counter(&credential.credential_id, verified.new_counter)
            .await?;

        tracing::info!(counter = verified.new_counter, "Authenticated with passkey");
        Ok(verified)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::db::models::CredentialRecord;
    use crate::db::CredentialRepository;
    use crate::error::CeremonyError;
    use crate::webauthn::engine::tests::{authentication_response, harness, identity, Harness};
    use crate::webauthn::verifier::VerificationFailure;

    async fn seed(h: &Harness, owner: &str, credential_id: &[u8], counter: u32) {
        h.credentials
            .insert(CredentialRecord {
                credential_id: credential_id.to_vec(),
                identity_id: owner.to_string(),
                public_key: b"key".to_vec(),
                algorithm: -7,
                counter,
                transports: vec![],
                created_at: Utc::now(),
                last_used_at: None,
            })
            .await
            .unwrap();
    }

    async fn stored_counter(h: &Harness, credential_id: &[u8]) -> u32 {
        h.credentials
            .find_by_credential_id(credential_id)
            .await
            .unwrap()
            .unwrap()
            .counter
    }

    #[tokio::test]
    async fn test_empty_allow_list_still_issues_options() {
        let h = harness();
        let options = h.engine.begin_authentication(&identity("u1")).await.unwrap();

        assert!(options.allow_credentials.is_empty());
        assert_eq!(options.challenge.len(), 32);
        assert_eq!(options.rp_id, "localhost");
    }

    #[tokio::test]
    async fn test_counter_regression_is_clone() {
        let h = harness();
        let u1 = identity("u1");
        seed(&h, "u1", b"cred", 5).await;

        let options = h.engine.begin_authentication(&u1).await.unwrap();
        h.verifier.set_counter(3);
        let result = h
            .engine
            .finish_authentication(&u1, &authentication_response(b"cred", &options.challenge))
            .await;

        assert!(matches!(
            result,
            Err(CeremonyError::PossibleCloneDetected { stored: 5, reported: 3 })
        ));
        assert_eq!(stored_counter(&h, b"cred").await, 5);
    }

    #[tokio::test]
    async fn test_equal_nonzero_counter_is_clone() {
        let h = harness();
        let u1 = identity("u1");
        seed(&h, "u1", b"cred", 7).await;

        let options = h.engine.begin_authentication(&u1).await.unwrap();
        h.verifier.set_counter(7);
        let result = h
            .engine
            .finish_authentication(&u1, &authentication_response(b"cred", &options.challenge))
            .await;

        assert!(matches!(
            result,
            Err(CeremonyError::PossibleCloneDetected { .. })
        ));
        assert_eq!(stored_counter(&h, b"cred").await, 7);
    }

    #[tokio::test]
    async fn test_non_counting_authenticator() {
        let h = harness();
        let u1 = identity("u1");
        seed(&h, "u1", b"cred", 0).await;
        h.verifier.set_counter(0);

        let options = h.engine.begin_authentication(&u1).await.unwrap();
        let verified = h
            .engine
            .finish_authentication(&u1, &authentication_response(b"cred", &options.challenge))
            .await
            .unwrap();

        assert_eq!(verified.new_counter, 0);
        assert_eq!(stored_counter(&h, b"cred").await, 0);
    }

    #[tokio::test]
    async fn test_credential_of_other_identity() {
        let h = harness();
        let u1 = identity("u1");
        seed(&h, "u2", b"theirs", 1).await;

        let options = h.engine.begin_authentication(&u1).await.unwrap();
        h.verifier.set_counter(2);
        let result = h
            .engine
            .finish_authentication(&u1, &authentication_response(b"theirs", &options.challenge))
            .await;

        assert!(matches!(result, Err(CeremonyError::CredentialNotRegistered)));
        assert_eq!(stored_counter(&h, b"theirs").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_credential() {
        let h = harness();
        let u1 = identity("u1");

        let options = h.engine.begin_authentication(&u1).await.unwrap();
        let result = h
            .engine
            .finish_authentication(&u1, &authentication_response(b"nope", &options.challenge))
            .await;
        assert!(matches!(result, Err(CeremonyError::CredentialNotRegistered)));
    }

    #[tokio::test]
    async fn test_bad_signature_keeps_counter() {
        let h = harness();
        let u1 = identity("u1");
        seed(&h, "u1", b"cred", 1).await;

        let options = h.engine.begin_authentication(&u1).await.unwrap();
        h.verifier.set_counter(9);
        let mut response = authentication_response(b"cred", &options.challenge);
        response.response.signature = b"bad".to_vec();

        let result = h.engine.finish_authentication(&u1, &response).await;
        assert!(matches!(
            result,
            Err(CeremonyError::AssertionInvalid(VerificationFailure::BadSignature))
        ));
        assert_eq!(stored_counter(&h, b"cred").await, 1);
    }

    #[tokio::test]
    async fn test_registration_challenge_does_not_authenticate() {
        let h = harness();
        let u1 = identity("u1");
        seed(&h, "u1", b"cred", 1).await;

        // Ceremony kinds have separate challenges
        let options = h.engine.begin_registration(&u1).await.unwrap();
        let result = h
            .engine
            .finish_authentication(&u1, &authentication_response(b"cred", &options.challenge))
            .await;
        assert!(matches!(result, Err(CeremonyError::NoActiveChallenge)));
    }
}
