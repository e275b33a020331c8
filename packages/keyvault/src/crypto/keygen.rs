//! Bounded RSA key generation on the blocking pool

use super::rsa::RsaKeyMaterial;
use crate::config::SUPPORTED_KEY_SIZES;
use crate::error::{VaultError, VaultResult};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Runs RSA key generation off the async executor, at most `concurrency` at a time
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    permits: Arc<Semaphore>,
    default_size: u32,
}

impl KeyGenerator {
    pub fn new(concurrency: usize, default_size: u32) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            default_size,
        }
    }

    /// Map a requested size onto a supported one.
    ///
    /// Unspecified or unsupported sizes fall back to the configured default.
    pub fn resolve_size(&self, requested: Option<u32>) -> u32 {
        match requested {
            Some(size) if SUPPORTED_KEY_SIZES.contains(&size) => size,
            Some(size) => {
                warn!(
                    requested = size,
                    fallback = self.default_size,
                    "Unsupported RSA key size requested, using default"
                );
                self.default_size
            }
            None => self.default_size,
        }
    }

    /// Generate a keypair of the resolved size
    pub async fn generate(&self, requested: Option<u32>) -> VaultResult<RsaKeyMaterial> {
        self.generate_exact(self.resolve_size(requested)).await
    }

    /// Generate a keypair of exactly `bits`, skipping size resolution
    pub async fn generate_exact(&self, bits: u32) -> VaultResult<RsaKeyMaterial> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| VaultError::Internal(format!("Key generation pool closed: {}", e)))?;

        let started = std::time::Instant::now();
        let material = tokio::task::spawn_blocking(move || RsaKeyMaterial::generate(bits))
            .await
            .map_err(|e| VaultError::Internal(format!("Key generation task failed: {}", e)))??;
        debug!(
            bits,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generated RSA keypair"
        );
        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_resolution() {
        let generator = KeyGenerator::new(1, 2048);
        assert_eq!(generator.resolve_size(None), 2048);
        assert_eq!(generator.resolve_size(Some(3072)), 3072);
        assert_eq!(generator.resolve_size(Some(4096)), 4096);
        assert_eq!(generator.resolve_size(Some(1024)), 2048);
        assert_eq!(generator.resolve_size(Some(2049)), 2048);
    }

    #[tokio::test]
    async fn generates_requested_size() {
        let generator = KeyGenerator::new(2, 2048);
        let material = generator.generate(Some(1234)).await.expect("keygen");
        assert_eq!(material.bits(), 2048);
        assert!(material.has_private());
    }

    #[tokio::test]
    async fn exact_size_skips_resolution() {
        let generator = KeyGenerator::new(1, 2048);
        let material = generator.generate_exact(1024).await.expect("keygen");
        assert_eq!(material.bits(), 1024);
    }
}
