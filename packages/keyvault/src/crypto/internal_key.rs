//! The vault's internal RSA keypair
//!
//! Envelope tokens (backups, key releases) are only decodable with this keypair.
//! It is generated once, optionally persisted, and then shared read-only.

use super::keygen::KeyGenerator;
use super::rsa::RsaKeyMaterial;
use crate::error::{VaultError, VaultResult};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use zeroize::Zeroizing;

/// Internal keypairs are always this size
pub const INTERNAL_KEY_BITS: u32 = 2048;

/// Loads and persists the internal keypair
#[derive(Debug, Clone)]
pub struct InternalKeyStore {
    key_path: PathBuf,
}

impl InternalKeyStore {
    pub fn new(key_path: PathBuf) -> Self {
        Self { key_path }
    }

    /// Generate a keypair that lives only as long as the process
    pub async fn ephemeral(generator: &KeyGenerator) -> VaultResult<Arc<RsaKeyMaterial>> {
        log::debug!("Generating ephemeral internal RSA keypair");
        Ok(Arc::new(generator.generate(Some(INTERNAL_KEY_BITS)).await?))
    }

    /// Load the keypair or create and save it if the file doesn't exist
    ///
    /// # Returns
    /// The parsed keypair, shared
    pub async fn load_or_create(
        &self,
        generator: &KeyGenerator,
    ) -> VaultResult<Arc<RsaKeyMaterial>> {
        if fs::try_exists(&self.key_path).await? {
            log::debug!("Loading internal RSA key from {}", self.key_path.display());
            return self.load().await.map(Arc::new);
        }

        log::info!(
            "Internal RSA key not found, generating new key at {}",
            self.key_path.display()
        );
        let material = generator.generate(Some(INTERNAL_KEY_BITS)).await?;
        self.save(&material).await?;
        Ok(Arc::new(material))
    }

    /// Load an existing keypair
    pub async fn load(&self) -> VaultResult<RsaKeyMaterial> {
        let bytes = Zeroizing::new(fs::read(&self.key_path).await.map_err(|e| {
            VaultError::Internal(format!(
                "Failed to read internal key from {}: {}",
                self.key_path.display(),
                e
            ))
        })?);
        let (private_der, public_der) = parse_keypair(&bytes)?;

        let private = RsaPrivateKey::from_pkcs1_der(private_der)
            .map_err(|e| VaultError::Internal(format!("Invalid internal private key: {}", e)))?;
        let public = RsaPublicKey::from_pkcs1_der(public_der)
            .map_err(|e| VaultError::Internal(format!("Invalid internal public key: {}", e)))?;
        if RsaPublicKey::from(&private) != public {
            return Err(VaultError::Internal(
                "Internal keypair halves do not match".to_string(),
            ));
        }
        Ok(RsaKeyMaterial::from_private(private))
    }

    /// Save with an atomic rename and owner-only permissions
    pub async fn save(&self, material: &RsaKeyMaterial) -> VaultResult<()> {
        let private_der = material.private_pkcs1_der()?;
        let public_der = material
            .public_key()
            .to_pkcs1_der()
            .map_err(|e| VaultError::Internal(format!("PKCS1 encoding failed: {}", e)))?;
        let bytes = encode_keypair(&private_der, public_der.as_bytes());

        if let Some(parent) = self.key_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.key_path.with_extension("tmp");
        fs::write(&temp_path, bytes.as_slice()).await.map_err(|e| {
            VaultError::Internal(format!(
                "Failed to write internal key to {}: {}",
                temp_path.display(),
                e
            ))
        })?;
        fs::rename(&temp_path, &self.key_path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600); // rw-------
            if let Err(e) = fs::set_permissions(&self.key_path, perms).await {
                log::warn!("Failed to set internal key file permissions: {}", e);
            }
        }

        log::info!("Internal RSA key saved to {}", self.key_path.display());
        Ok(())
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

/// `[u32 LE len][PKCS#1 private][u32 LE len][PKCS#1 public]`
fn encode_keypair(private_der: &[u8], public_der: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(8 + private_der.len() + public_der.len()));
    for segment in [private_der, public_der] {
        out.extend_from_slice(&(segment.len() as u32).to_le_bytes());
        out.extend_from_slice(segment);
    }
    out
}

fn parse_keypair(bytes: &[u8]) -> VaultResult<(&[u8], &[u8])> {
    let (private_der, rest) = read_segment(bytes, "private")?;
    let (public_der, rest) = read_segment(rest, "public")?;
    if !rest.is_empty() {
        return Err(VaultError::Internal(format!(
            "Invalid internal keypair format: {} trailing bytes",
            rest.len()
        )));
    }
    Ok((private_der, public_der))
}

fn read_segment<'a>(bytes: &'a [u8], label: &str) -> VaultResult<(&'a [u8], &'a [u8])> {
    let (len, rest) = bytes
        .split_first_chunk::<4>()
        .ok_or_else(|| {
            VaultError::Internal(format!(
                "Invalid internal keypair format: missing {} key length",
                label
            ))
        })?;
    let len = u32::from_le_bytes(*len) as usize;
    if len > rest.len() {
        return Err(VaultError::Internal(format!(
            "Invalid internal keypair format: {} key length {} exceeds remaining {}",
            label,
            len,
            rest.len()
        )));
    }
    Ok(rest.split_at(len))
}
