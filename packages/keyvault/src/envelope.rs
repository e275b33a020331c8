//! Encrypt-then-encode envelope tokens
//!
//! A token is `b64url(b64url(header) "." b64url(wrapped_key) "." b64url(iv) "." b64url(ciphertext))`
//! with every base64 step URL-safe and unpadded. The payload is the JSON form of the
//! value, encrypted with a fresh AES-256-CBC key that is wrapped for the vault's
//! internal keypair with RSA-OAEP-SHA256.
//!
//! The header names `A256CBC-HS512` but no MAC is computed or checked, so tokens stay
//! byte-compatible with existing backups. Decoding does not inspect the header.

use crate::crypto::{aes, RsaKeyMaterial};
use crate::error::{VaultError, VaultResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

const SEGMENT_COUNT: usize = 4;

/// Protected header of every envelope token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub alg: String,
    pub enc: String,
}

impl Default for EnvelopeHeader {
    fn default() -> Self {
        Self {
            alg: "RSA-OAEP".to_string(),
            enc: "A256CBC-HS512".to_string(),
        }
    }
}

/// Envelope codec bound to the internal keypair
#[derive(Debug, Clone)]
pub struct Envelope {
    keypair: Arc<RsaKeyMaterial>,
}

impl Envelope {
    pub fn new(keypair: Arc<RsaKeyMaterial>) -> Self {
        Self { keypair }
    }

    /// Serialize `value` and seal it into a token
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> VaultResult<String> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| VaultError::Internal(format!("Envelope payload serialization failed: {}", e)))?;

        let key = aes::generate_key();
        let iv = aes::generate_iv();
        let ciphertext = aes::encrypt(&key[..], &iv, &payload)?;

        let header = serde_json::to_vec(&EnvelopeHeader::default())
            .map_err(|e| VaultError::Internal(format!("Envelope header serialization failed: {}", e)))?;
        let wrapped_key = self.keypair.wrap_key(&key[..])?;

        let joined = [
            header.as_slice(),
            wrapped_key.as_slice(),
            iv.as_slice(),
            ciphertext.as_slice(),
        ]
        .iter()
        .map(|segment| URL_SAFE_NO_PAD.encode(segment))
        .collect::<Vec<_>>()
        .join(".");

        Ok(URL_SAFE_NO_PAD.encode(joined.as_bytes()))
    }

    /// Open a token and deserialize its payload
    pub fn decode<T: DeserializeOwned>(&self, token: &str) -> VaultResult<T> {
        let outer = URL_SAFE_NO_PAD
            .decode(token.trim().as_bytes())
            .map_err(|e| VaultError::Format(format!("Envelope is not base64url: {}", e)))?;
        let joined = String::from_utf8(outer)
            .map_err(|e| VaultError::Format(format!("Envelope is not UTF-8: {}", e)))?;

        let segments = joined.split('.').collect::<Vec<_>>();
        if segments.len() != SEGMENT_COUNT {
            return Err(VaultError::Format(format!(
                "Envelope has {} segments, expected {}",
                segments.len(),
                SEGMENT_COUNT
            )));
        }
        let wrapped_key = decode_segment(segments[1], "wrapped key")?;
        let iv = decode_segment(segments[2], "iv")?;
        let ciphertext = decode_segment(segments[3], "ciphertext")?;

        let key = self.keypair.unwrap_key(&wrapped_key)?;
        let payload = aes::decrypt(&key, &iv, &ciphertext)?;

        let value: serde_json::Value = serde_json::from_slice(&payload)
            .map_err(|e| VaultError::Deserialization(format!("Envelope payload is not JSON: {}", e)))?;
        if value.is_null() {
            return Err(VaultError::Deserialization(
                "Envelope payload is empty".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| {
            VaultError::Deserialization(format!("Envelope payload has the wrong shape: {}", e))
        })
    }
}

fn decode_segment(segment: &str, label: &str) -> VaultResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment.as_bytes())
        .map_err(|e| VaultError::Format(format!("Envelope {} segment is not base64url: {}", label, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use once_cell::sync::Lazy;
    use std::collections::BTreeMap;

    static ENVELOPE: Lazy<Envelope> = Lazy::new(|| {
        Envelope::new(Arc::new(RsaKeyMaterial::generate(2048).expect("keygen")))
    });

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        tags: BTreeMap<String, String>,
    }

    fn segments(token: &str) -> Vec<Vec<u8>> {
        let joined = URL_SAFE_NO_PAD.decode(token).expect("outer base64");
        String::from_utf8(joined)
            .expect("utf8")
            .split('.')
            .map(|s| URL_SAFE_NO_PAD.decode(s).expect("segment base64"))
            .collect()
    }

    #[test]
    fn token_layout() {
        let token = ENVELOPE.encode(&"hello").expect("encode");
        assert!(!token.contains('='));
        let parts = segments(&token);
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], br#"{"alg":"RSA-OAEP","enc":"A256CBC-HS512"}"#.to_vec());
        assert_eq!(parts[1].len(), 256);
        assert_eq!(parts[2].len(), 16);
        assert_eq!(parts[3].len() % 16, 0);
    }

    #[test]
    fn round_trip_struct() {
        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), "dev".to_string());
        let value = Sample {
            name: "s1".to_string(),
            tags,
        };
        let token = ENVELOPE.encode(&value).expect("encode");
        let decoded: Sample = ENVELOPE.decode(&token).expect("decode");
        assert_eq!(decoded, value);
    }

    #[test]
    fn fresh_key_per_token() {
        let a = ENVELOPE.encode(&"same").expect("encode");
        let b = ENVELOPE.encode(&"same").expect("encode");
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_tokens_are_format_errors() {
        let three = URL_SAFE_NO_PAD.encode("a.b.c");
        let err = ENVELOPE.decode::<String>(&three).expect_err("three segments");
        assert_eq!(err.kind(), ErrorKind::Format);

        let err = ENVELOPE.decode::<String>("!!not base64!!").expect_err("bad base64");
        assert_eq!(err.kind(), ErrorKind::Format);

        let bad_segment = URL_SAFE_NO_PAD.encode("e30.###.AAAA.AAAA");
        let err = ENVELOPE.decode::<String>(&bad_segment).expect_err("bad segment");
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn foreign_keypair_cannot_open() {
        let other = Envelope::new(Arc::new(RsaKeyMaterial::generate(2048).expect("keygen")));
        let token = other.encode(&"secret").expect("encode");
        let err = ENVELOPE.decode::<String>(&token).expect_err("wrong keypair");
        assert_eq!(err.kind(), ErrorKind::Encryption);
    }

    #[test]
    fn shape_mismatch_and_null() {
        let token = ENVELOPE.encode(&42u32).expect("encode");
        let err = ENVELOPE.decode::<Sample>(&token).expect_err("wrong shape");
        assert_eq!(err.kind(), ErrorKind::Deserialization);

        let token = ENVELOPE.encode(&Option::<Sample>::None).expect("encode");
        let err = ENVELOPE.decode::<Sample>(&token).expect_err("null payload");
        assert_eq!(err.kind(), ErrorKind::Deserialization);
    }
}
