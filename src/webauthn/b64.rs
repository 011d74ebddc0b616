//! Serde helpers for byte strings carried as unpadded base64url, the
//! encoding browsers use for every binary field of a WebAuthn JSON payload.
//!
//! Use with `#[serde(with = "crate::webauthn::b64")]` on a `Vec<u8>` field,
//! or `b64::option` on an `Option<Vec<u8>>`.

use base64::prelude::*;
use serde::{Deserialize, Deserializer, Serializer};

pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url, tolerating trailing `=` padding some clients still send
pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_URL_SAFE_NO_PAD.decode(text.trim_end_matches('='))
}

pub fn serialize<S, T>(bytes: T, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: AsRef<[u8]>,
{
    serializer.serialize_str(&encode(bytes))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    decode(&text).map_err(serde::de::Error::custom)
}

pub mod option {
    use super::*;

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_some(&encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) if !text.is_empty() => decode(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_accepts_padding() {
        assert_eq!(decode("AQI").unwrap(), vec![1, 2]);
        assert_eq!(decode("AQI=").unwrap(), vec![1, 2]);
        assert_eq!(encode([0xfb, 0xff]), "-_8");
    }

    #[test]
    fn test_rejects_standard_alphabet() {
        assert!(decode("+/8").is_err());
    }
}
