use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// RSA modulus sizes accepted for generated keys
pub const SUPPORTED_KEY_SIZES: [u32; 3] = [2048, 3072, 4096];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyVaultConfig {
    /// Base URL used when building item identifiers
    #[serde(default = "default_vault_url")]
    pub vault_url: String,
    /// Where the envelope keypair is persisted. `None` keeps it in memory only.
    #[serde(default)]
    pub internal_key_path: Option<PathBuf>,
    /// Retention window between soft delete and scheduled purge
    #[serde(default = "default_recoverable_days")]
    pub recoverable_days: u32,
    /// Purge reaper interval in seconds (0 disables the reaper)
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
    #[serde(default = "default_key_size")]
    pub default_key_size: u32,
    /// Upper bound on concurrent RSA key generations
    #[serde(default = "default_keygen_concurrency")]
    pub keygen_concurrency: usize,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    #[serde(default = "default_certificate_validity_days")]
    pub certificate_validity_days: u32,
}

fn default_vault_url() -> String {
    "https://localhost:8443".to_string()
}

fn default_recoverable_days() -> u32 {
    90
}

fn default_purge_interval() -> u64 {
    3600 // 1 hour in seconds
}

fn default_key_size() -> u32 {
    2048
}

fn default_keygen_concurrency() -> usize {
    num_cpus::get().max(1)
}

fn default_max_page_size() -> usize {
    25
}

fn default_certificate_validity_days() -> u32 {
    365
}

/// OS-specific location for a persisted envelope keypair
pub fn default_internal_key_path() -> PathBuf {
    match dirs::config_dir() {
        Some(mut dir) => {
            dir.push("cryypt");
            dir.push("keyvault_internal.key");
            dir
        }
        None => {
            warn!("Could not determine OS config directory, using ./cryypt");
            PathBuf::from("./cryypt/keyvault_internal.key")
        }
    }
}

impl Default for KeyVaultConfig {
    fn default() -> Self {
        Self {
            vault_url: default_vault_url(),
            internal_key_path: None,
            recoverable_days: default_recoverable_days(),
            purge_interval_seconds: default_purge_interval(),
            default_key_size: default_key_size(),
            keygen_concurrency: default_keygen_concurrency(),
            max_page_size: default_max_page_size(),
            certificate_validity_days: default_certificate_validity_days(),
        }
    }
}

impl KeyVaultConfig {
    /// Defaults, with the internal keypair persisted under the OS config directory
    pub fn persistent() -> Self {
        Self {
            internal_key_path: Some(default_internal_key_path()),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> VaultResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            VaultError::Validation(format!(
                "Invalid configuration file {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> VaultResult<()> {
        if self.vault_url.trim().is_empty() {
            return Err(VaultError::validation("vault_url must not be empty"));
        }
        if !SUPPORTED_KEY_SIZES.contains(&self.default_key_size) {
            return Err(VaultError::Validation(format!(
                "default_key_size {} is not one of {:?}",
                self.default_key_size, SUPPORTED_KEY_SIZES
            )));
        }
        if self.recoverable_days == 0 {
            return Err(VaultError::validation("recoverable_days must be at least 1"));
        }
        if self.keygen_concurrency == 0 {
            return Err(VaultError::validation("keygen_concurrency must be at least 1"));
        }
        if self.max_page_size == 0 {
            return Err(VaultError::validation("max_page_size must be at least 1"));
        }
        if self.certificate_validity_days == 0 {
            return Err(VaultError::validation(
                "certificate_validity_days must be at least 1",
            ));
        }
        Ok(())
    }

    /// Identifier base without a trailing slash
    pub fn base_url(&self) -> &str {
        self.vault_url.trim_end_matches('/')
    }

    /// Soft-delete retention as a duration
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.recoverable_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = KeyVaultConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.recoverable_days, 90);
        assert_eq!(config.max_page_size, 25);
        assert_eq!(config.default_key_size, 2048);
    }

    #[test]
    fn partial_file_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"vault_url": "https://vault.test/", "recoverable_days": 7}}"#)
            .expect("write config");

        let config = KeyVaultConfig::from_file(file.path()).expect("config loads");
        assert_eq!(config.base_url(), "https://vault.test");
        assert_eq!(config.recoverable_days, 7);
        assert_eq!(config.purge_interval_seconds, 3600);
        assert!(config.internal_key_path.is_none());
    }

    #[test]
    fn persistent_keeps_keypair_under_config_dir() {
        let config = KeyVaultConfig::persistent();
        assert!(config.validate().is_ok());
        let path = config.internal_key_path.expect("key path");
        assert!(path.ends_with("cryypt/keyvault_internal.key"));
    }

    #[test]
    fn rejects_unsupported_default_key_size() {
        let config = KeyVaultConfig {
            default_key_size: 1024,
            ..KeyVaultConfig::default()
        };
        assert!(matches!(config.validate(), Err(VaultError::Validation(_))));
    }
}
