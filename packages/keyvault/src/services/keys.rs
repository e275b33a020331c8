//! Key operations: lifecycle, cryptographic verbs, rotation and release

use super::{ensure_not_deleted, ensure_unmanaged, ItemBackup, ServiceContext};
use crate::crypto::{random_bytes, KeyGenerator, RsaKeyMaterial};
use crate::error::{EntityKind, ResultExt, VaultError, VaultResult};
use crate::logging::log_lifecycle_event;
use crate::model::{
    item_id, Item, ItemProperties, JsonWebKey, KeyBundle, KeyOperation, KeyReleasePolicy,
    KeyRotationPolicy, KeyType, PropertiesPatch, Version,
};
use crate::store::{EntityStore, LineageSnapshot, Page, PageRequest};
use crate::validation::{validate_name, validate_tags};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Backup payload of a key name: its versions plus any rotation policy
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyBackup {
    kind: EntityKind,
    lineage: LineageSnapshot<KeyBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rotation_policy: Option<KeyRotationPolicy>,
}

/// Parameters of `create_key`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateKeyOptions {
    /// `RSA` or `RSA-HSM`
    #[serde(default = "default_key_type")]
    pub key_type: String,
    /// Unset or unsupported sizes fall back to the configured default
    #[serde(default)]
    pub key_size: Option<u32>,
    /// Defaults to every operation
    #[serde(default)]
    pub key_ops: Option<BTreeSet<KeyOperation>>,
    #[serde(default)]
    pub properties: PropertiesPatch,
    #[serde(default)]
    pub exportable: bool,
    #[serde(default)]
    pub release_policy: Option<KeyReleasePolicy>,
}

fn default_key_type() -> String {
    KeyType::Rsa.to_string()
}

impl Default for CreateKeyOptions {
    fn default() -> Self {
        Self {
            key_type: default_key_type(),
            key_size: None,
            key_ops: None,
            properties: PropertiesPatch::default(),
            exportable: false,
            release_policy: None,
        }
    }
}

impl CreateKeyOptions {
    pub fn rsa(key_size: u32) -> Self {
        Self {
            key_size: Some(key_size),
            ..Self::default()
        }
    }

    pub fn key_ops<I: IntoIterator<Item = KeyOperation>>(mut self, ops: I) -> Self {
        self.key_ops = Some(ops.into_iter().collect());
        self
    }

    pub fn exportable_with(mut self, policy: KeyReleasePolicy) -> Self {
        self.exportable = true;
        self.release_policy = Some(policy);
        self
    }
}

/// Parameters of `import_key`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportKeyOptions {
    #[serde(default)]
    pub hsm: bool,
    #[serde(default)]
    pub key_ops: Option<BTreeSet<KeyOperation>>,
    #[serde(default)]
    pub properties: PropertiesPatch,
}

/// Changes applied by `update_key_properties`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyUpdate {
    #[serde(default)]
    pub properties: PropertiesPatch,
    #[serde(default)]
    pub key_ops: Option<BTreeSet<KeyOperation>>,
    #[serde(default)]
    pub release_policy: Option<KeyReleasePolicy>,
}

/// Output of a key verb
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOperationResult {
    /// Identifier of the key version used
    pub kid: String,
    pub value: Vec<u8>,
}

/// Payload sealed by `release_key`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasedKey {
    pub kid: String,
    pub key_type: KeyType,
    pub key_size: u32,
    pub material: crate::model::KeyMaterial,
    pub target_attestation: String,
}

#[derive(Debug)]
pub struct KeyService<S: EntityStore> {
    store: Arc<S>,
    ctx: ServiceContext,
    generator: KeyGenerator,
    rotation_policies: Arc<DashMap<String, KeyRotationPolicy>>,
}

impl<S: EntityStore> Clone for KeyService<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ctx: self.ctx.clone(),
            generator: self.generator.clone(),
            rotation_policies: self.rotation_policies.clone(),
        }
    }
}

impl<S: EntityStore> KeyService<S> {
    pub fn new(store: Arc<S>, ctx: ServiceContext, generator: KeyGenerator) -> Self {
        Self {
            store,
            ctx,
            generator,
            rotation_policies: Arc::new(DashMap::new()),
        }
    }

    pub fn id(&self, key: &KeyBundle) -> String {
        key.id(&self.ctx.vault_url)
    }

    /// Public JWK view of a key version
    pub fn jwk(&self, key: &KeyBundle) -> VaultResult<JsonWebKey> {
        let material = RsaKeyMaterial::from_key_material(&key.material)
            .for_item(EntityKind::Key, key.name(), Some(&key.version()))?;
        let (n, e) = material.jwk_components();
        Ok(JsonWebKey {
            kid: self.id(key),
            kty: key.key_type,
            key_ops: key.key_ops.iter().copied().collect(),
            n,
            e,
        })
    }

    /// Generate a new RSA key version
    pub async fn create_key(&self, name: &str, options: CreateKeyOptions) -> VaultResult<KeyBundle> {
        validate_name(name)?;
        let key_type: KeyType = options.key_type.parse()?;
        if let Some(tags) = &options.properties.tags {
            validate_tags(tags)?;
        }
        if options.exportable && options.release_policy.is_none() {
            return Err(VaultError::validation(
                "Exportable keys require a release policy",
            ));
        }
        self.store
            .read(move |tables| {
                ensure_not_deleted::<KeyBundle>(tables, name)?;
                ensure_unmanaged::<KeyBundle>(tables, name)
            })
            .await?;

        let material = self.generator.generate(options.key_size).await?;
        let key = KeyBundle {
            properties: ItemProperties::new(name, Utc::now(), &options.properties),
            key_type,
            key_size: material.bits(),
            key_ops: options.key_ops.unwrap_or_else(KeyOperation::all),
            material: material.to_key_material()?,
            exportable: options.exportable,
            release_policy: options.release_policy,
        };
        let stored = self.insert_version(name, key).await?;
        debug!(key = name, version = %stored.version(), bits = stored.key_size, "Key version created");
        Ok(stored)
    }

    async fn insert_version(&self, name: &str, key: KeyBundle) -> VaultResult<KeyBundle> {
        self.store
            .atomically(move |tx| {
                ensure_unmanaged::<KeyBundle>(tx.tables(), name)?;
                tx.create(name, key)
            })
            .await
    }

    /// Import PKCS#1 or PKCS#8 material, DER or PEM, private or public-only
    pub async fn import_key(
        &self,
        name: &str,
        key_bytes: &[u8],
        options: ImportKeyOptions,
    ) -> VaultResult<KeyBundle> {
        validate_name(name)?;
        if let Some(tags) = &options.properties.tags {
            validate_tags(tags)?;
        }
        let material = RsaKeyMaterial::import(key_bytes)?;
        let key_ops = options.key_ops.unwrap_or_else(|| {
            if material.has_private() {
                KeyOperation::all()
            } else {
                [KeyOperation::Encrypt, KeyOperation::Verify, KeyOperation::WrapKey]
                    .into_iter()
                    .collect()
            }
        });
        let key = KeyBundle {
            properties: ItemProperties::new(name, Utc::now(), &options.properties),
            key_type: if options.hsm { KeyType::RsaHsm } else { KeyType::Rsa },
            key_size: material.bits(),
            key_ops,
            material: material.to_key_material()?,
            exportable: false,
            release_policy: None,
        };
        let stored = self.insert_version(name, key).await?;
        log_lifecycle_event("IMPORT", EntityKind::Key, name, true);
        Ok(stored)
    }

    pub async fn get_key(&self, name: &str, version: Option<Version>) -> VaultResult<KeyBundle> {
        match version {
            Some(version) => self.store.get_version(name, version).await,
            None => self.store.get_current(name).await,
        }
    }

    pub async fn list_keys(&self, page: &PageRequest) -> VaultResult<Page<KeyBundle>> {
        self.store.list_current(page).await
    }

    pub async fn list_key_versions(
        &self,
        name: &str,
        page: &PageRequest,
    ) -> VaultResult<Page<KeyBundle>> {
        self.store.list_versions(name, page).await
    }

    pub async fn update_key_properties(
        &self,
        name: &str,
        version: Version,
        update: KeyUpdate,
    ) -> VaultResult<KeyBundle> {
        if let Some(tags) = &update.properties.tags {
            validate_tags(tags)?;
        }
        self.store
            .atomically(move |tx| {
                ensure_unmanaged::<KeyBundle>(tx.tables(), name)?;
                let current = tx.table::<KeyBundle>().version(name, version)?;
                if let (Some(existing), Some(_)) = (&current.release_policy, &update.release_policy) {
                    if existing.immutable {
                        return Err(VaultError::not_permitted(
                            EntityKind::Key,
                            name,
                            Some(&version),
                            "release policy is immutable",
                        ));
                    }
                }
                tx.update::<KeyBundle, _>(name, version, |key| {
                    update.properties.apply(key.properties_mut());
                    if let Some(ops) = update.key_ops {
                        key.key_ops = ops;
                    }
                    if let Some(policy) = update.release_policy {
                        key.release_policy = Some(policy);
                    }
                })
            })
            .await
    }

    pub async fn delete_key(&self, name: &str) -> VaultResult<KeyBundle> {
        let deleted = self
            .store
            .atomically(move |tx| {
                ensure_unmanaged::<KeyBundle>(tx.tables(), name)?;
                tx.soft_delete::<KeyBundle>(name)
            })
            .await?;
        log_lifecycle_event("SOFT_DELETE", EntityKind::Key, name, true);
        Ok(deleted)
    }

    pub async fn get_deleted_key(&self, name: &str) -> VaultResult<KeyBundle> {
        self.store.get_deleted(name).await
    }

    pub async fn list_deleted_keys(&self, page: &PageRequest) -> VaultResult<Page<KeyBundle>> {
        self.store.list_deleted(page).await
    }

    pub async fn recover_deleted_key(&self, name: &str) -> VaultResult<KeyBundle> {
        let recovered = self
            .store
            .atomically(move |tx| {
                ensure_unmanaged::<KeyBundle>(tx.tables(), name)?;
                tx.recover::<KeyBundle>(name)
            })
            .await?;
        log_lifecycle_event("RECOVER", EntityKind::Key, name, true);
        Ok(recovered)
    }

    pub async fn purge_deleted_key(&self, name: &str) -> VaultResult<()> {
        self.store
            .atomically(move |tx| {
                ensure_unmanaged::<KeyBundle>(tx.tables(), name)?;
                tx.purge::<KeyBundle>(name)
            })
            .await?;
        self.forget_rotation_policy(name);
        log_lifecycle_event("PURGE", EntityKind::Key, name, true);
        Ok(())
    }

    /// New version with the same type, size and operations and fresh material
    pub async fn rotate_key(&self, name: &str) -> VaultResult<KeyBundle> {
        let current: KeyBundle = self.store.get_current(name).await?;
        if current.properties.managed {
            return Err(VaultError::conflict(
                EntityKind::Key,
                name,
                "item is managed by a certificate; change it through the certificate",
            ));
        }
        let material = self.generator.generate_exact(current.key_size).await?;
        let patch = PropertiesPatch {
            tags: Some(current.properties.tags.clone()),
            ..PropertiesPatch::default()
        };
        let key = KeyBundle {
            properties: ItemProperties::new(name, Utc::now(), &patch),
            key_type: current.key_type,
            key_size: material.bits(),
            key_ops: current.key_ops.clone(),
            material: material.to_key_material()?,
            exportable: current.exportable,
            release_policy: current.release_policy.clone(),
        };
        let rotated = self.insert_version(name, key).await?;
        log_lifecycle_event("ROTATE", EntityKind::Key, name, true);
        Ok(rotated)
    }

    /// Resolve a version and check it may perform `op` at `now`
    async fn authorize(
        &self,
        name: &str,
        version: Option<Version>,
        op: KeyOperation,
        now: DateTime<Utc>,
    ) -> VaultResult<(KeyBundle, RsaKeyMaterial)> {
        let key = self.get_key(name, version).await?;
        let version = key.version();
        if !key.key_ops.contains(&op) {
            return Err(VaultError::not_permitted(
                EntityKind::Key,
                name,
                Some(&version),
                format!("operation {} is not allowed", op),
            ));
        }
        key.properties
            .attributes
            .is_usable_at(now)
            .map_err(|reason| VaultError::not_permitted(EntityKind::Key, name, Some(&version), reason))?;
        if op.requires_private() && !key.material.has_private() {
            return Err(VaultError::not_permitted(
                EntityKind::Key,
                name,
                Some(&version),
                format!("operation {} requires the private key", op),
            ));
        }
        let material = RsaKeyMaterial::from_key_material(&key.material)
            .for_item(EntityKind::Key, name, Some(&version))?;
        Ok((key, material))
    }

    fn result(&self, key: &KeyBundle, value: Vec<u8>) -> KeyOperationResult {
        KeyOperationResult {
            kid: self.id(key),
            value,
        }
    }

    pub async fn encrypt(
        &self,
        name: &str,
        version: Option<Version>,
        plaintext: &[u8],
        now: DateTime<Utc>,
    ) -> VaultResult<KeyOperationResult> {
        let (key, material) = self.authorize(name, version, KeyOperation::Encrypt, now).await?;
        let ciphertext = material
            .encrypt(plaintext)
            .for_item(EntityKind::Key, name, Some(&key.version()))?;
        Ok(self.result(&key, ciphertext))
    }

    pub async fn decrypt(
        &self,
        name: &str,
        version: Option<Version>,
        ciphertext: &[u8],
        now: DateTime<Utc>,
    ) -> VaultResult<KeyOperationResult> {
        let (key, material) = self.authorize(name, version, KeyOperation::Decrypt, now).await?;
        let plaintext = material
            .decrypt(ciphertext)
            .for_item(EntityKind::Key, name, Some(&key.version()))?;
        Ok(self.result(&key, plaintext.to_vec()))
    }

    /// Sign a caller-computed digest of 20, 32, 48 or 64 bytes
    pub async fn sign(
        &self,
        name: &str,
        version: Option<Version>,
        digest: &[u8],
        now: DateTime<Utc>,
    ) -> VaultResult<KeyOperationResult> {
        let (key, material) = self.authorize(name, version, KeyOperation::Sign, now).await?;
        let signature = material
            .sign(digest)
            .for_item(EntityKind::Key, name, Some(&key.version()))?;
        Ok(self.result(&key, signature))
    }

    pub async fn verify(
        &self,
        name: &str,
        version: Option<Version>,
        digest: &[u8],
        signature: &[u8],
        now: DateTime<Utc>,
    ) -> VaultResult<bool> {
        let (_, material) = self.authorize(name, version, KeyOperation::Verify, now).await?;
        Ok(material.verify(digest, signature))
    }

    pub async fn wrap_key(
        &self,
        name: &str,
        version: Option<Version>,
        key_bytes: &[u8],
        now: DateTime<Utc>,
    ) -> VaultResult<KeyOperationResult> {
        let (key, material) = self.authorize(name, version, KeyOperation::WrapKey, now).await?;
        let wrapped = material
            .wrap_key(key_bytes)
            .for_item(EntityKind::Key, name, Some(&key.version()))?;
        Ok(self.result(&key, wrapped))
    }

    pub async fn unwrap_key(
        &self,
        name: &str,
        version: Option<Version>,
        wrapped: &[u8],
        now: DateTime<Utc>,
    ) -> VaultResult<KeyOperationResult> {
        let (key, material) = self.authorize(name, version, KeyOperation::UnwrapKey, now).await?;
        let unwrapped: Zeroizing<Vec<u8>> = material
            .unwrap_key(wrapped)
            .for_item(EntityKind::Key, name, Some(&key.version()))?;
        Ok(self.result(&key, unwrapped.to_vec()))
    }

    /// Every version of `name`, sealed in an envelope token
    pub async fn backup_key(&self, name: &str) -> VaultResult<String> {
        let lineage = self
            .store
            .read(move |tables| {
                ensure_unmanaged::<KeyBundle>(tables, name)?;
                tables.keys.export(name)
            })
            .await?;
        let backup = KeyBackup {
            kind: EntityKind::Key,
            lineage,
            rotation_policy: self
                .rotation_policies
                .get(name)
                .map(|entry| entry.value().clone()),
        };
        let token = self.ctx.envelope.encode(&backup)?;
        log_lifecycle_event("BACKUP", EntityKind::Key, name, true);
        Ok(token)
    }

    /// Reinstate a backup token with its original material, version ids and rotation policy
    pub async fn restore_key(&self, token: &str) -> VaultResult<KeyBundle> {
        let backup: KeyBackup = self.ctx.envelope.decode(token)?;
        let lineage = ItemBackup {
            kind: backup.kind,
            lineage: backup.lineage,
        }
        .into_lineage()?;
        if lineage.versions.iter().any(|k| k.properties.managed) {
            return Err(VaultError::conflict(
                EntityKind::Key,
                &lineage.name,
                "backup belongs to a certificate; restore the certificate instead",
            ));
        }
        let name = lineage.name.clone();
        let restored = self.store.restore(lineage).await;
        if let (Ok(_), Some(mut policy)) = (&restored, backup.rotation_policy) {
            policy.id = Some(self.rotation_policy_id(&name));
            self.rotation_policies.insert(name.clone(), policy);
        }
        log_lifecycle_event("RESTORE", EntityKind::Key, &name, restored.is_ok());
        restored
    }

    /// Export an exportable key version to a caller presenting `target_attestation`.
    ///
    /// The attestation is recorded in the token but not verified.
    pub async fn release_key(
        &self,
        name: &str,
        version: Option<Version>,
        target_attestation: &str,
        now: DateTime<Utc>,
    ) -> VaultResult<String> {
        let key = self.get_key(name, version).await?;
        let version = key.version();
        if !key.exportable || key.release_policy.is_none() {
            log_lifecycle_event("RELEASE", EntityKind::Key, name, false);
            return Err(VaultError::not_permitted(
                EntityKind::Key,
                name,
                Some(&version),
                "key is not exportable under a release policy",
            ));
        }
        key.properties
            .attributes
            .is_usable_at(now)
            .map_err(|reason| VaultError::not_permitted(EntityKind::Key, name, Some(&version), reason))?;
        if target_attestation.trim().is_empty() {
            return Err(VaultError::validation("Target attestation is required"));
        }
        let released = ReleasedKey {
            kid: self.id(&key),
            key_type: key.key_type,
            key_size: key.key_size,
            material: key.material.clone(),
            target_attestation: target_attestation.to_string(),
        };
        let token = self.ctx.envelope.encode(&released)?;
        log_lifecycle_event("RELEASE", EntityKind::Key, name, true);
        Ok(token)
    }

    pub fn get_random_bytes(&self, count: usize) -> VaultResult<Vec<u8>> {
        random_bytes(count)
    }

    fn rotation_policy_id(&self, name: &str) -> String {
        format!(
            "{}/rotationpolicy",
            item_id(&self.ctx.vault_url, EntityKind::Key, name, None)
        )
    }

    /// Stored policy, or an empty one carrying the policy id
    pub async fn get_rotation_policy(&self, name: &str) -> VaultResult<KeyRotationPolicy> {
        let _: KeyBundle = self.store.get_current(name).await?;
        Ok(self
            .rotation_policies
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| KeyRotationPolicy {
                id: Some(self.rotation_policy_id(name)),
                ..KeyRotationPolicy::default()
            }))
    }

    /// Validate and store a rotation policy; schedules are not executed
    pub async fn set_rotation_policy(
        &self,
        name: &str,
        mut policy: KeyRotationPolicy,
    ) -> VaultResult<KeyRotationPolicy> {
        policy.validate()?;
        let key: KeyBundle = self.store.get_current(name).await?;
        if key.properties.managed {
            return Err(VaultError::conflict(
                EntityKind::Key,
                name,
                "item is managed by a certificate; change it through the certificate",
            ));
        }
        let now = Utc::now();
        policy.id = Some(self.rotation_policy_id(name));
        policy.created = self
            .rotation_policies
            .get(name)
            .and_then(|existing| existing.created)
            .or(Some(now));
        policy.updated = Some(now);
        self.rotation_policies
            .insert(name.to_string(), policy.clone());
        Ok(policy)
    }

    /// Drop the rotation policy of a purged name
    pub fn forget_rotation_policy(&self, name: &str) {
        if self.rotation_policies.remove(name).is_some() {
            debug!(key = name, "Dropped rotation policy of purged key");
        }
    }
}
