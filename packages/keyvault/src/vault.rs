//! Vault facade wiring configuration, store and services together

use crate::config::KeyVaultConfig;
use crate::crypto::{InternalKeyStore, KeyGenerator, RsaKeyMaterial};
use crate::envelope::Envelope;
use crate::error::{EntityKind, VaultResult};
use crate::services::{CertificateService, KeyService, SecretService, ServiceContext};
use crate::store::{EntityStore, MemoryStore, PurgeReaper, ReaperHandle};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One emulated vault: a store plus the secret, key and certificate services over it
#[derive(Debug)]
pub struct KeyVault<S: EntityStore = MemoryStore> {
    config: KeyVaultConfig,
    store: Arc<S>,
    secrets: SecretService<S>,
    keys: KeyService<S>,
    certificates: CertificateService<S>,
}

impl KeyVault<MemoryStore> {
    /// In-memory vault; loads or creates the internal keypair per `config`
    pub async fn new(config: KeyVaultConfig) -> VaultResult<Self> {
        config.validate()?;
        let store = Arc::new(MemoryStore::new(config.retention(), config.max_page_size));
        Self::with_store(config, store).await
    }
}

impl<S: EntityStore> KeyVault<S> {
    pub async fn with_store(config: KeyVaultConfig, store: Arc<S>) -> VaultResult<Self> {
        config.validate()?;
        let generator = KeyGenerator::new(config.keygen_concurrency, config.default_key_size);
        let keypair = match &config.internal_key_path {
            Some(path) => {
                InternalKeyStore::new(path.clone())
                    .load_or_create(&generator)
                    .await?
            }
            None => InternalKeyStore::ephemeral(&generator).await?,
        };
        Self::with_keypair(config, store, keypair)
    }

    /// Build around an existing internal keypair
    pub fn with_keypair(
        config: KeyVaultConfig,
        store: Arc<S>,
        keypair: Arc<RsaKeyMaterial>,
    ) -> VaultResult<Self> {
        config.validate()?;
        let generator = KeyGenerator::new(config.keygen_concurrency, config.default_key_size);
        let ctx = ServiceContext::new(config.base_url(), Envelope::new(keypair));
        let vault = Self {
            secrets: SecretService::new(store.clone(), ctx.clone()),
            keys: KeyService::new(store.clone(), ctx.clone(), generator.clone()),
            certificates: CertificateService::new(
                store.clone(),
                ctx,
                generator,
                config.certificate_validity_days,
            ),
            store,
            config,
        };
        info!(vault_url = vault.url(), "Key vault ready");
        Ok(vault)
    }

    pub fn secrets(&self) -> &SecretService<S> {
        &self.secrets
    }

    pub fn keys(&self) -> &KeyService<S> {
        &self.keys
    }

    pub fn certificates(&self) -> &CertificateService<S> {
        &self.certificates
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &KeyVaultConfig {
        &self.config
    }

    pub fn url(&self) -> &str {
        self.config.base_url()
    }

    /// Reaper purging expired deletions; side state of purged names is dropped with them
    pub fn purge_reaper(&self) -> PurgeReaper<S> {
        let keys = self.keys.clone();
        let certificates = self.certificates.clone();
        let hook = move |purged: &[(EntityKind, String)]| {
            for (kind, name) in purged {
                match kind {
                    EntityKind::Key => keys.forget_rotation_policy(name),
                    EntityKind::Certificate => certificates.forget_operation(name),
                    EntityKind::Secret => {}
                }
            }
        };
        PurgeReaper::new(self.store.clone()).with_hook(Arc::new(hook))
    }

    /// Start the background reaper; `None` when the configured interval is zero
    pub fn spawn_purge_reaper(&self) -> Option<ReaperHandle> {
        match self.config.purge_interval_seconds {
            0 => None,
            seconds => Some(self.purge_reaper().spawn(Duration::from_secs(seconds))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::PropertiesPatch;

    #[tokio::test]
    async fn ephemeral_vault_serves_all_services() {
        let config = KeyVaultConfig {
            vault_url: "https://vault.test/".to_string(),
            ..KeyVaultConfig::default()
        };
        let vault = KeyVault::new(config).await.expect("vault");
        assert_eq!(vault.url(), "https://vault.test");

        let secret = vault
            .secrets()
            .set_secret("s1", "value", None, PropertiesPatch::default())
            .await
            .expect("set");
        assert!(vault
            .secrets()
            .id(&secret)
            .starts_with("https://vault.test/secrets/s1/"));
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = KeyVaultConfig {
            default_key_size: 1024,
            ..KeyVaultConfig::default()
        };
        let err = KeyVault::new(config).await.expect_err("1024-bit default");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn persisted_keypair_survives_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = KeyVaultConfig {
            internal_key_path: Some(dir.path().join("internal.key")),
            ..KeyVaultConfig::default()
        };
        let first = KeyVault::new(config.clone()).await.expect("vault");
        first
            .secrets()
            .set_secret("s1", "value", None, PropertiesPatch::default())
            .await
            .expect("set");
        let token = first.secrets().backup_secret("s1").await.expect("backup");

        let second = KeyVault::new(config).await.expect("reopen");
        let restored = second.secrets().restore_secret(&token).await.expect("restore");
        assert_eq!(restored.value, "value");
    }

    #[tokio::test]
    async fn reaper_disabled_at_zero_interval() {
        let config = KeyVaultConfig {
            purge_interval_seconds: 0,
            ..KeyVaultConfig::default()
        };
        let vault = KeyVault::new(config).await.expect("vault");
        assert!(vault.spawn_purge_reaper().is_none());
    }
}
