//! Parsing of the binary structures an authenticator returns.
//!
//! ## authenticatorData layout
//! ```text
//! rpIdHash (32) | flags (1) | signCount (4, big endian)
//!   [ if AT: aaguid (16) | credIdLen (2) | credId | COSE_Key (CBOR) ]
//!   [ if ED: extensions (CBOR) ]
//! ```

use ciborium::value::Value;
use p256::ecdsa::VerifyingKey;
use sha2::{Digest, Sha256};

use crate::webauthn::types::COSE_ALG_ES256;
use crate::webauthn::verifier::VerificationFailure;

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_ATTESTED_CREDENTIAL: u8 = 0x40;
pub const FLAG_EXTENSIONS: u8 = 0x80;

const HEADER_LEN: usize = 37;

fn malformed(what: &str) -> VerificationFailure {
    VerificationFailure::Malformed(what.to_string())
}

/// Credential data present when the AT flag is set (registration only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredential {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// COSE_Key bytes exactly as the authenticator encoded them
    pub public_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredential>,
}

impl AuthenticatorData {
    pub fn parse(data: &[u8]) -> Result<Self, VerificationFailure> {
        if data.len() < HEADER_LEN {
            return Err(malformed("authenticator data"));
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&data[..32]);
        let flags = data[32];
        let sign_count = u32::from_be_bytes([data[33], data[34], data[35], data[36]]);

        let attested_credential = if flags & FLAG_ATTESTED_CREDENTIAL != 0 {
            Some(parse_attested_credential(&data[HEADER_LEN..])?)
        } else {
            None
        };

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested_credential,
        })
    }

    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }

    /// The RP ID hash must be SHA-256 of the RP ID the server is configured with
    pub fn check_rp_id(&self, rp_id: &str) -> Result<(), VerificationFailure> {
        let expected = Sha256::digest(rp_id.as_bytes());
        if expected.as_slice() != self.rp_id_hash {
            return Err(VerificationFailure::RpIdMismatch);
        }
        Ok(())
    }
}

fn parse_attested_credential(rest: &[u8]) -> Result<AttestedCredential, VerificationFailure> {
    if rest.len() < 18 {
        return Err(malformed("attested credential data"));
    }

    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&rest[..16]);
    let id_len = u16::from_be_bytes([rest[16], rest[17]]) as usize;
    let rest = &rest[18..];
    if rest.len() < id_len {
        return Err(malformed("credential id"));
    }
    let credential_id = rest[..id_len].to_vec();
    let rest = &rest[id_len..];

    // The key is followed by optional extensions, so measure how much CBOR
    // the key itself consumed
    let mut cursor = std::io::Cursor::new(rest);
    let _: Value =
        ciborium::from_reader(&mut cursor).map_err(|_| malformed("credential public key"))?;
    let key_len = cursor.position() as usize;

    Ok(AttestedCredential {
        aaguid,
        credential_id,
        public_key: rest[..key_len].to_vec(),
    })
}

/// Look up an integer label in a CBOR map
fn label<'a>(map: &'a [(Value, Value)], key: i64) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| k.as_integer().map(i128::from) == Some(i128::from(key)))
        .map(|(_, v)| v)
}

fn integer(value: Option<&Value>) -> Option<i64> {
    value
        .and_then(Value::as_integer)
        .and_then(|i| i64::try_from(i).ok())
}

/// COSE algorithm (label 3) of a COSE_Key
pub fn cose_algorithm(cose_key: &[u8]) -> Result<i64, VerificationFailure> {
    let value: Value =
        ciborium::from_reader(cose_key).map_err(|_| malformed("COSE key"))?;
    let map = value.as_map().ok_or_else(|| malformed("COSE key"))?;
    integer(label(map, 3)).ok_or_else(|| malformed("COSE key algorithm"))
}

/// Decode an EC2 / P-256 / ES256 COSE_Key into a verifying key
///
/// Labels: kty (1) = 2, alg (3) = -7, crv (-1) = 1, x (-2), y (-3)
pub fn decode_es256_key(cose_key: &[u8]) -> Result<VerifyingKey, VerificationFailure> {
    let value: Value =
        ciborium::from_reader(cose_key).map_err(|_| malformed("COSE key"))?;
    let map = value.as_map().ok_or_else(|| malformed("COSE key"))?;

    if integer(label(map, 1)) != Some(2) {
        return Err(malformed("COSE key type"));
    }
    match integer(label(map, 3)) {
        Some(COSE_ALG_ES256) => {}
        Some(other) => return Err(VerificationFailure::UnsupportedAlgorithm(other)),
        None => return Err(malformed("COSE key algorithm")),
    }
    if integer(label(map, -1)) != Some(1) {
        return Err(malformed("COSE key curve"));
    }

    let coordinate = |key: i64| {
        label(map, key)
            .and_then(Value::as_bytes)
            .filter(|b| b.len() == 32)
            .ok_or_else(|| malformed("COSE key coordinate"))
    };
    let x = coordinate(-2)?;
    let y = coordinate(-3)?;

    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(x);
    sec1.extend_from_slice(y);

    VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| malformed("P-256 point"))
}
