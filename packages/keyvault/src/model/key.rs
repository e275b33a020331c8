//! Key bundles, key operations and rotation policies

use super::item::{Item, ItemProperties};
use super::serde_b64;
use crate::error::{EntityKind, VaultError, VaultResult};
use crate::validation::validate_iso_duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "RSA")]
    Rsa,
    /// Accepted for compatibility; protected by software like plain RSA
    #[serde(rename = "RSA-HSM")]
    RsaHsm,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Rsa => f.write_str("RSA"),
            KeyType::RsaHsm => f.write_str("RSA-HSM"),
        }
    }
}

impl FromStr for KeyType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RSA" => Ok(KeyType::Rsa),
            "RSA-HSM" => Ok(KeyType::RsaHsm),
            other => Err(VaultError::Validation(format!(
                "Unsupported key type '{}'",
                other
            ))),
        }
    }
}

/// Verbs a key version may be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyOperation {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    WrapKey,
    UnwrapKey,
}

impl KeyOperation {
    pub const ALL: [KeyOperation; 6] = [
        KeyOperation::Encrypt,
        KeyOperation::Decrypt,
        KeyOperation::Sign,
        KeyOperation::Verify,
        KeyOperation::WrapKey,
        KeyOperation::UnwrapKey,
    ];

    /// Whether the verb needs the private half
    pub fn requires_private(self) -> bool {
        matches!(
            self,
            KeyOperation::Decrypt | KeyOperation::Sign | KeyOperation::UnwrapKey
        )
    }

    pub fn all() -> BTreeSet<KeyOperation> {
        Self::ALL.into_iter().collect()
    }
}

impl fmt::Display for KeyOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyOperation::Encrypt => "encrypt",
            KeyOperation::Decrypt => "decrypt",
            KeyOperation::Sign => "sign",
            KeyOperation::Verify => "verify",
            KeyOperation::WrapKey => "wrapKey",
            KeyOperation::UnwrapKey => "unwrapKey",
        };
        f.write_str(name)
    }
}

/// DER-encoded RSA material of one key version
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterial {
    /// SubjectPublicKeyInfo DER
    #[serde(with = "serde_b64")]
    pub public_der: Vec<u8>,
    /// PKCS#8 DER; absent for public-only keys
    #[serde(default, with = "serde_b64::option")]
    pub private_der: Option<Vec<u8>>,
}

impl KeyMaterial {
    pub fn has_private(&self) -> bool {
        self.private_der.is_some()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_der_len", &self.public_der.len())
            .field("has_private", &self.has_private())
            .finish()
    }
}

/// Policy gating key release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyReleasePolicy {
    #[serde(default = "default_release_content_type")]
    pub content_type: String,
    /// Base64url policy document
    pub data: String,
    #[serde(default)]
    pub immutable: bool,
}

fn default_release_content_type() -> String {
    "application/json; charset=utf-8".to_string()
}

/// One version of an RSA key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyBundle {
    #[serde(flatten)]
    pub properties: ItemProperties,
    pub key_type: KeyType,
    pub key_size: u32,
    pub key_ops: BTreeSet<KeyOperation>,
    pub material: KeyMaterial,
    #[serde(default)]
    pub exportable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_policy: Option<KeyReleasePolicy>,
}

impl Item for KeyBundle {
    const KIND: EntityKind = EntityKind::Key;

    fn properties(&self) -> &ItemProperties {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut ItemProperties {
        &mut self.properties
    }
}

/// Public JSON Web Key view of a key version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct JsonWebKey {
    pub kid: String,
    pub kty: KeyType,
    pub key_ops: Vec<KeyOperation>,
    /// Modulus, base64url
    pub n: String,
    /// Public exponent, base64url
    pub e: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RotationAction {
    Rotate,
    Notify,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationTrigger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_after_create: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_before_expiry: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifetimeAction {
    pub trigger: RotationTrigger,
    pub action: RotationAction,
}

/// Declarative rotation schedule; stored and echoed, never enforced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRotationPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub lifetime_actions: Vec<LifetimeAction>,
    /// ISO-8601 duration applied as the expiry of rotated versions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl KeyRotationPolicy {
    /// Each action must carry exactly one well-formed trigger
    pub fn validate(&self) -> VaultResult<()> {
        for (index, action) in self.lifetime_actions.iter().enumerate() {
            let trigger = &action.trigger;
            let duration = match (&trigger.time_after_create, &trigger.time_before_expiry) {
                (Some(d), None) | (None, Some(d)) => d,
                _ => {
                    return Err(VaultError::Validation(format!(
                        "Lifetime action {} must set exactly one of timeAfterCreate or timeBeforeExpiry",
                        index
                    )))
                }
            };
            validate_iso_duration(duration)?;
        }
        if let Some(expiry) = &self.expiry_time {
            validate_iso_duration(expiry)?;
        }
        Ok(())
    }
}
