//! RSA primitives backing the key verbs
//!
//! Signatures are PKCS#1 v1.5 over caller-supplied digests, encryption and key
//! wrapping use OAEP with SHA-256 for both the hash and MGF1.

use crate::error::{VaultError, VaultResult};
use crate::model::KeyMaterial;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

/// Output length of the OAEP hash (SHA-256)
const OAEP_HASH_LEN: usize = 32;

/// Parsed RSA key, optionally without its private half
#[derive(Clone)]
pub struct RsaKeyMaterial {
    private: Option<RsaPrivateKey>,
    public: RsaPublicKey,
}

impl std::fmt::Debug for RsaKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyMaterial")
            .field("bits", &self.bits())
            .field("has_private", &self.has_private())
            .finish()
    }
}

impl RsaKeyMaterial {
    /// Generate a fresh keypair. Blocks for the duration of prime generation.
    pub fn generate(bits: u32) -> VaultResult<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits as usize)
            .map_err(|e| VaultError::Internal(format!("RSA key generation failed: {}", e)))?;
        Ok(Self::from_private(private))
    }

    pub fn from_private(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self {
            private: Some(private),
            public,
        }
    }

    pub fn from_public(public: RsaPublicKey) -> Self {
        Self {
            private: None,
            public,
        }
    }

    /// Rebuild from stored DER material
    pub fn from_key_material(material: &KeyMaterial) -> VaultResult<Self> {
        match &material.private_der {
            Some(der) => {
                let private = RsaPrivateKey::from_pkcs8_der(der).map_err(|e| {
                    VaultError::Internal(format!("Stored RSA private key is corrupt: {}", e))
                })?;
                Ok(Self::from_private(private))
            }
            None => {
                let public = RsaPublicKey::from_public_key_der(&material.public_der).map_err(|e| {
                    VaultError::Internal(format!("Stored RSA public key is corrupt: {}", e))
                })?;
                Ok(Self::from_public(public))
            }
        }
    }

    /// Encode for storage
    pub fn to_key_material(&self) -> VaultResult<KeyMaterial> {
        let private_der = match &self.private {
            Some(_) => Some(self.private_pkcs8_der()?.to_vec()),
            None => None,
        };
        Ok(KeyMaterial {
            public_der: self.public_spki_der()?,
            private_der,
        })
    }

    /// Import a key given as PKCS#1 or PKCS#8 DER, or the PEM form of either.
    ///
    /// Private keys are tried before public keys.
    pub fn import(bytes: &[u8]) -> VaultResult<Self> {
        if let Ok(text) = std::str::from_utf8(bytes) {
            if text.contains("-----BEGIN") {
                return Self::import_pem(text);
            }
        }
        if let Ok(private) = RsaPrivateKey::from_pkcs8_der(bytes) {
            return Ok(Self::from_private(private));
        }
        if let Ok(private) = RsaPrivateKey::from_pkcs1_der(bytes) {
            return Ok(Self::from_private(private));
        }
        if let Ok(public) = RsaPublicKey::from_public_key_der(bytes) {
            return Ok(Self::from_public(public));
        }
        if let Ok(public) = RsaPublicKey::from_pkcs1_der(bytes) {
            return Ok(Self::from_public(public));
        }
        Err(VaultError::validation(
            "Key material is not a PKCS#1 or PKCS#8 RSA key",
        ))
    }

    fn import_pem(text: &str) -> VaultResult<Self> {
        if let Ok(private) = RsaPrivateKey::from_pkcs8_pem(text) {
            return Ok(Self::from_private(private));
        }
        if let Ok(private) = RsaPrivateKey::from_pkcs1_pem(text) {
            return Ok(Self::from_private(private));
        }
        if let Ok(public) = RsaPublicKey::from_public_key_pem(text) {
            return Ok(Self::from_public(public));
        }
        if let Ok(public) = RsaPublicKey::from_pkcs1_pem(text) {
            return Ok(Self::from_public(public));
        }
        Err(VaultError::validation("PEM block is not an RSA key"))
    }

    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Modulus length in bits
    pub fn bits(&self) -> u32 {
        (self.public.size() * 8) as u32
    }

    /// Whether two keys share the same public half
    pub fn same_public_key(&self, other: &RsaPublicKey) -> bool {
        &self.public == other
    }

    fn private(&self) -> VaultResult<&RsaPrivateKey> {
        self.private
            .as_ref()
            .ok_or_else(|| VaultError::validation("Key has no private component"))
    }

    pub fn public_spki_der(&self) -> VaultResult<Vec<u8>> {
        Ok(self
            .public
            .to_public_key_der()
            .map_err(|e| VaultError::Internal(format!("SPKI encoding failed: {}", e)))?
            .as_bytes()
            .to_vec())
    }

    pub fn private_pkcs8_der(&self) -> VaultResult<Zeroizing<Vec<u8>>> {
        let doc = self
            .private()?
            .to_pkcs8_der()
            .map_err(|e| VaultError::Internal(format!("PKCS8 encoding failed: {}", e)))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    pub fn private_pkcs1_der(&self) -> VaultResult<Zeroizing<Vec<u8>>> {
        let doc = self
            .private()?
            .to_pkcs1_der()
            .map_err(|e| VaultError::Internal(format!("PKCS1 encoding failed: {}", e)))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    pub fn private_pkcs8_pem(&self) -> VaultResult<Zeroizing<String>> {
        self.private()?
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| VaultError::Internal(format!("PKCS8 PEM encoding failed: {}", e)))
    }

    /// JWK `n` and `e`, base64url without padding
    pub fn jwk_components(&self) -> (String, String) {
        (
            URL_SAFE_NO_PAD.encode(self.public.n().to_bytes_be()),
            URL_SAFE_NO_PAD.encode(self.public.e().to_bytes_be()),
        )
    }

    /// Sign an already-hashed digest; the hash is inferred from the digest length
    pub fn sign(&self, digest: &[u8]) -> VaultResult<Vec<u8>> {
        let scheme = signature_scheme(digest.len())?;
        self.private()?
            .sign(scheme, digest)
            .map_err(|e| VaultError::Signature(format!("RSA signing failed: {}", e)))
    }

    /// `false` on mismatch or malformed input
    pub fn verify(&self, digest: &[u8], signature: &[u8]) -> bool {
        match signature_scheme(digest.len()) {
            Ok(scheme) => self.public.verify(scheme, digest, signature).is_ok(),
            Err(_) => false,
        }
    }

    /// Largest plaintext RSA-OAEP-SHA256 accepts for this modulus
    pub fn max_plaintext_len(&self) -> usize {
        self.public.size().saturating_sub(2 * OAEP_HASH_LEN + 2)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        let max = self.max_plaintext_len();
        if plaintext.len() > max {
            return Err(VaultError::Validation(format!(
                "Plaintext of {} bytes exceeds the RSA-OAEP limit of {} bytes",
                plaintext.len(),
                max
            )));
        }
        self.public
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| VaultError::Encryption(format!("RSA-OAEP encryption failed: {}", e)))
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> VaultResult<Zeroizing<Vec<u8>>> {
        let private = self
            .private
            .as_ref()
            .ok_or_else(|| VaultError::Encryption("Key has no private component".to_string()))?;
        private
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|e| VaultError::Encryption(format!("RSA-OAEP decryption failed: {}", e)))
    }

    /// Wrap a symmetric key blob
    pub fn wrap_key(&self, key: &[u8]) -> VaultResult<Vec<u8>> {
        self.encrypt(key)
    }

    pub fn unwrap_key(&self, wrapped: &[u8]) -> VaultResult<Zeroizing<Vec<u8>>> {
        self.decrypt(wrapped)
    }
}

fn signature_scheme(digest_len: usize) -> VaultResult<Pkcs1v15Sign> {
    match digest_len {
        20 => Ok(Pkcs1v15Sign::new::<Sha1>()),
        32 => Ok(Pkcs1v15Sign::new::<Sha256>()),
        48 => Ok(Pkcs1v15Sign::new::<Sha384>()),
        64 => Ok(Pkcs1v15Sign::new::<Sha512>()),
        other => Err(VaultError::Validation(format!(
            "Digest length {} does not match SHA-1, SHA-256, SHA-384 or SHA-512",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use once_cell::sync::Lazy;
    use sha2::Digest;

    static KEY: Lazy<RsaKeyMaterial> =
        Lazy::new(|| RsaKeyMaterial::generate(2048).expect("keygen"));

    #[test]
    fn sign_verify_each_digest_size() {
        let message = b"payload";
        let digests = [
            Sha1::digest(message).to_vec(),
            Sha256::digest(message).to_vec(),
            Sha384::digest(message).to_vec(),
            Sha512::digest(message).to_vec(),
        ];
        for digest in digests {
            let signature = KEY.sign(&digest).expect("sign");
            assert_eq!(signature.len(), 256);
            assert!(KEY.verify(&digest, &signature), "len {}", digest.len());

            let mut tampered = digest.clone();
            tampered[0] ^= 0xff;
            assert!(!KEY.verify(&tampered, &signature));
        }
    }

    #[test]
    fn odd_digest_length_is_validation_error() {
        let err = KEY.sign(&[0u8; 31]).expect_err("31 bytes is not a digest");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!KEY.verify(&[0u8; 31], &[0u8; 256]));
    }

    #[test]
    fn oaep_bound() {
        assert_eq!(KEY.max_plaintext_len(), 190);
        let at_limit = vec![7u8; 190];
        let ciphertext = KEY.encrypt(&at_limit).expect("190 bytes fits");
        assert_eq!(KEY.decrypt(&ciphertext).expect("decrypt").as_slice(), &at_limit[..]);

        let err = KEY.encrypt(&[7u8; 191]).expect_err("191 bytes is too long");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn decrypt_garbage_is_encryption_error() {
        let err = KEY.decrypt(&[1u8; 256]).expect_err("garbage");
        assert_eq!(err.kind(), ErrorKind::Encryption);
    }

    #[test]
    fn public_only_cannot_sign() {
        let public = RsaKeyMaterial::from_public(KEY.public_key().clone());
        let digest = Sha256::digest(b"x");
        assert!(public.sign(&digest).is_err());
        let signature = KEY.sign(&digest).expect("sign");
        assert!(public.verify(&digest, &signature));
    }

    #[test]
    fn import_formats() {
        let pkcs1 = KEY.private_pkcs1_der().expect("pkcs1");
        assert!(RsaKeyMaterial::import(&pkcs1).expect("pkcs1 import").has_private());

        let pem = KEY.private_pkcs8_pem().expect("pem");
        let imported = RsaKeyMaterial::import(pem.as_bytes()).expect("pem import");
        assert!(imported.same_public_key(KEY.public_key()));

        let spki = KEY.public_spki_der().expect("spki");
        assert!(!RsaKeyMaterial::import(&spki).expect("spki import").has_private());

        assert!(RsaKeyMaterial::import(b"not a key").is_err());
    }

    #[test]
    fn stored_material_round_trip() {
        let stored = KEY.to_key_material().expect("encode");
        let parsed = RsaKeyMaterial::from_key_material(&stored).expect("decode");
        assert!(parsed.same_public_key(KEY.public_key()));
        assert_eq!(parsed.jwk_components().1, "AQAB");
    }
}
