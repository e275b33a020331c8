//! AES-256-CBC with PKCS#7 padding, used only by the envelope codec

use crate::error::{VaultError, VaultResult};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

pub const AES_KEY_LEN: usize = 32;
pub const AES_IV_LEN: usize = 16;

/// Fresh random 256-bit content key
pub fn generate_key() -> Zeroizing<[u8; AES_KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; AES_KEY_LEN]);
    rand::rng().fill_bytes(&mut key[..]);
    key
}

/// Fresh random 128-bit IV
pub fn generate_iv() -> [u8; AES_IV_LEN] {
    let mut iv = [0u8; AES_IV_LEN];
    rand::rng().fill_bytes(&mut iv);
    iv
}

pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|e| VaultError::Encryption(format!("Invalid AES key or IV: {}", e)))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> VaultResult<Zeroizing<Vec<u8>>> {
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|e| VaultError::Encryption(format!("Invalid AES key or IV: {}", e)))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map(Zeroizing::new)
        .map_err(|e| VaultError::Encryption(format!("AES-CBC decryption failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn pads_to_block_size() {
        let key = generate_key();
        let iv = generate_iv();
        let ciphertext = encrypt(&key[..], &iv, b"sixteen byte msg").expect("encrypt");
        // a full block of padding is appended to block-aligned input
        assert_eq!(ciphertext.len(), 32);
        let plaintext = decrypt(&key[..], &iv, &ciphertext).expect("decrypt");
        assert_eq!(plaintext.as_slice(), b"sixteen byte msg");
    }

    #[test]
    fn wrong_key_or_iv_length() {
        let err = encrypt(&[0u8; 16], &[0u8; 16], b"x").expect_err("short key");
        assert_eq!(err.kind(), ErrorKind::Encryption);
        let err = decrypt(&[0u8; 32], &[0u8; 8], &[0u8; 16]).expect_err("short iv");
        assert_eq!(err.kind(), ErrorKind::Encryption);
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let key = generate_key();
        let iv = generate_iv();
        let ciphertext = encrypt(&key[..], &iv, b"hello").expect("encrypt");
        let err = decrypt(&key[..], &iv, &ciphertext[..8]).expect_err("truncated");
        assert_eq!(err.kind(), ErrorKind::Encryption);
    }
}
