//! Secret operations

use super::{ensure_unmanaged, ItemBackup, ServiceContext};
use crate::error::{EntityKind, VaultError, VaultResult};
use crate::logging::log_lifecycle_event;
use crate::model::{Item, ItemProperties, PropertiesPatch, SecretBundle, Version};
use crate::store::{EntityStore, Page, PageRequest};
use crate::validation::{validate_name, validate_tags};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Largest secret value accepted, in bytes
pub const MAX_SECRET_VALUE_LEN: usize = 25 * 1024;

#[derive(Debug)]
pub struct SecretService<S: EntityStore> {
    store: Arc<S>,
    ctx: ServiceContext,
}

impl<S: EntityStore> Clone for SecretService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: EntityStore> SecretService<S> {
    pub fn new(store: Arc<S>, ctx: ServiceContext) -> Self {
        Self { store, ctx }
    }

    /// Item identifier of a secret version
    pub fn id(&self, secret: &SecretBundle) -> String {
        secret.id(&self.ctx.vault_url)
    }

    /// Store a value as a new version of `name`
    pub async fn set_secret(
        &self,
        name: &str,
        value: &str,
        content_type: Option<&str>,
        patch: PropertiesPatch,
    ) -> VaultResult<SecretBundle> {
        validate_name(name)?;
        if let Some(tags) = &patch.tags {
            validate_tags(tags)?;
        }
        if value.len() > MAX_SECRET_VALUE_LEN {
            return Err(VaultError::Validation(format!(
                "Secret value exceeds {} bytes",
                MAX_SECRET_VALUE_LEN
            )));
        }

        let secret = SecretBundle {
            properties: ItemProperties::new(name, Utc::now(), &patch),
            value: value.to_string(),
            content_type: content_type.map(str::to_string),
            kid: None,
        };
        let stored = self
            .store
            .atomically(move |tx| {
                ensure_unmanaged::<SecretBundle>(tx.tables(), name)?;
                tx.create(name, secret)
            })
            .await?;
        debug!(secret = name, version = %stored.version(), "Secret version created");
        Ok(stored)
    }

    /// Current version, or a specific one
    pub async fn get_secret(&self, name: &str, version: Option<Version>) -> VaultResult<SecretBundle> {
        match version {
            Some(version) => self.store.get_version(name, version).await,
            None => self.store.get_current(name).await,
        }
    }

    pub async fn list_secrets(&self, page: &PageRequest) -> VaultResult<Page<SecretBundle>> {
        self.store.list_current(page).await
    }

    pub async fn list_secret_versions(
        &self,
        name: &str,
        page: &PageRequest,
    ) -> VaultResult<Page<SecretBundle>> {
        self.store.list_versions(name, page).await
    }

    pub async fn update_secret_properties(
        &self,
        name: &str,
        version: Version,
        patch: PropertiesPatch,
    ) -> VaultResult<SecretBundle> {
        if let Some(tags) = &patch.tags {
            validate_tags(tags)?;
        }
        self.store
            .atomically(move |tx| {
                ensure_unmanaged::<SecretBundle>(tx.tables(), name)?;
                tx.update::<SecretBundle, _>(name, version, |secret| {
                    patch.apply(secret.properties_mut())
                })
            })
            .await
    }

    pub async fn delete_secret(&self, name: &str) -> VaultResult<SecretBundle> {
        let deleted = self
            .store
            .atomically(move |tx| {
                ensure_unmanaged::<SecretBundle>(tx.tables(), name)?;
                tx.soft_delete::<SecretBundle>(name)
            })
            .await?;
        log_lifecycle_event("SOFT_DELETE", EntityKind::Secret, name, true);
        Ok(deleted)
    }

    pub async fn get_deleted_secret(&self, name: &str) -> VaultResult<SecretBundle> {
        self.store.get_deleted(name).await
    }

    pub async fn list_deleted_secrets(&self, page: &PageRequest) -> VaultResult<Page<SecretBundle>> {
        self.store.list_deleted(page).await
    }

    pub async fn recover_deleted_secret(&self, name: &str) -> VaultResult<SecretBundle> {
        let recovered = self
            .store
            .atomically(move |tx| {
                ensure_unmanaged::<SecretBundle>(tx.tables(), name)?;
                tx.recover::<SecretBundle>(name)
            })
            .await?;
        log_lifecycle_event("RECOVER", EntityKind::Secret, name, true);
        Ok(recovered)
    }

    pub async fn purge_deleted_secret(&self, name: &str) -> VaultResult<()> {
        self.store
            .atomically(move |tx| {
                ensure_unmanaged::<SecretBundle>(tx.tables(), name)?;
                tx.purge::<SecretBundle>(name)
            })
            .await?;
        log_lifecycle_event("PURGE", EntityKind::Secret, name, true);
        Ok(())
    }

    /// Every version of `name`, sealed in an envelope token
    pub async fn backup_secret(&self, name: &str) -> VaultResult<String> {
        let lineage = self
            .store
            .read(move |tables| {
                ensure_unmanaged::<SecretBundle>(tables, name)?;
                tables.secrets.export(name)
            })
            .await?;
        let token = self.ctx.envelope.encode(&ItemBackup::new(lineage))?;
        log_lifecycle_event("BACKUP", EntityKind::Secret, name, true);
        Ok(token)
    }

    /// Reinstate a backup token, keeping its version ids
    pub async fn restore_secret(&self, token: &str) -> VaultResult<SecretBundle> {
        let backup: ItemBackup<SecretBundle> = self.ctx.envelope.decode(token)?;
        let lineage = backup.into_lineage()?;
        if lineage.versions.iter().any(|s| s.properties.managed) {
            return Err(VaultError::conflict(
                EntityKind::Secret,
                &lineage.name,
                "backup belongs to a certificate; restore the certificate instead",
            ));
        }
        let name = lineage.name.clone();
        let restored = self.store.restore(lineage).await;
        log_lifecycle_event("RESTORE", EntityKind::Secret, &name, restored.is_ok());
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RsaKeyMaterial;
    use crate::envelope::Envelope;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;
    use once_cell::sync::Lazy;

    static KEYPAIR: Lazy<Arc<RsaKeyMaterial>> =
        Lazy::new(|| Arc::new(RsaKeyMaterial::generate(2048).expect("keygen")));

    fn service() -> SecretService<MemoryStore> {
        let ctx = ServiceContext::new("https://vault.test", Envelope::new(KEYPAIR.clone()));
        SecretService::new(Arc::new(MemoryStore::default()), ctx)
    }

    #[tokio::test]
    async fn set_get_and_versions() {
        let secrets = service();
        let v1 = secrets
            .set_secret("s1", "one", Some("text/plain"), PropertiesPatch::default())
            .await
            .expect("v1");
        let v2 = secrets
            .set_secret("s1", "two", None, PropertiesPatch::default().tag("env", "dev"))
            .await
            .expect("v2");
        assert!(v2.version() > v1.version());
        assert_eq!(secrets.get_secret("s1", None).await.expect("current").value, "two");
        assert_eq!(
            secrets.get_secret("s1", Some(v1.version())).await.expect("v1").value,
            "one"
        );
        assert!(secrets.id(&v2).starts_with("https://vault.test/secrets/s1/"));
        assert_eq!(v2.properties.tags.get("env").map(String::as_str), Some("dev"));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let secrets = service();
        let err = secrets
            .set_secret("bad name", "x", None, PropertiesPatch::default())
            .await
            .expect_err("name");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let huge = "x".repeat(MAX_SECRET_VALUE_LEN + 1);
        let err = secrets
            .set_secret("big", &huge, None, PropertiesPatch::default())
            .await
            .expect_err("size");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn update_does_not_add_a_version() {
        let secrets = service();
        let v1 = secrets
            .set_secret("s1", "one", None, PropertiesPatch::default())
            .await
            .expect("v1");
        let updated = secrets
            .update_secret_properties("s1", v1.version(), PropertiesPatch::default().enabled(false))
            .await
            .expect("update");
        assert!(!updated.properties.attributes.enabled);
        assert_eq!(updated.version(), v1.version());
        let versions = secrets
            .list_secret_versions("s1", &PageRequest::default())
            .await
            .expect("versions");
        assert_eq!(versions.items.len(), 1);
    }

    #[tokio::test]
    async fn restore_onto_active_name() {
        let secrets = service();
        secrets
            .set_secret("s1", "one", None, PropertiesPatch::default())
            .await
            .expect("set");
        let token = secrets.backup_secret("s1").await.expect("backup");

        let same = secrets.restore_secret(&token).await.expect("identical content");
        assert_eq!(same.value, "one");

        secrets
            .set_secret("s1", "two", None, PropertiesPatch::default())
            .await
            .expect("diverge");
        let err = secrets.restore_secret(&token).await.expect_err("content differs");
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
