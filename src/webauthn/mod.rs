//! # WebAuthn Module
//!
//! Passkey ceremonies for the relying party.
//!
//! ## Submodules
//! - `engine`: [`CeremonyEngine`](engine::CeremonyEngine) and relying party settings
//! - `registration`: begin/finish for creating passkeys
//! - `authentication`: begin/finish for signing in, including clone detection
//! - `verifier`: the cryptographic boundary and its error type
//! - `es256`: production verifier (ES256 keys, attestation "none")
//! - `types`: JSON shapes exchanged with the browser
//! - `client_data`, `authenticator_data`: parsers for what the authenticator returns
//! - `b64`: unpadded base64url helpers
//!
//! ## WebAuthn Flow Overview
//!
//! ### Registration (Creating a Passkey)
//! 1. Client asks for options → `CeremonyEngine::begin_registration()`
//! 2. Server issues a challenge and lists credentials to exclude
//! 3. Client calls `navigator.credentials.create()`
//! 4. Client posts the credential → `CeremonyEngine::finish_registration()`
//! 5. Server consumes the challenge, verifies, stores the public key
//!
//! ### Authentication (Logging In)
//! 1. Client asks for options → `CeremonyEngine::begin_authentication()`
//! 2. Server issues a challenge and lists the allowed credentials
//! 3. Client calls `navigator.credentials.get()`
//! 4. Client posts the assertion → `CeremonyEngine::finish_authentication()`
//! 5. Server verifies the signature and the counter, then updates the counter

pub mod authentication;
pub mod authenticator_data;
pub mod b64;
pub mod client_data;
pub mod engine;
pub mod es256;
pub mod registration;
pub mod types;
pub mod verifier;

pub use engine::{CeremonyEngine, RelyingParty};
pub use es256::Es256Verifier;
pub use verifier::{Verifier, VerificationFailure};
