use super::item::{Item, ItemProperties};
use crate::error::EntityKind;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Content type of a certificate's backing secret holding a PKCS#12 archive
pub const CONTENT_TYPE_PKCS12: &str = "application/x-pkcs12";

/// Content type of a certificate's backing secret holding PEM text
pub const CONTENT_TYPE_PEM: &str = "application/x-pem-file";

/// One version of a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretBundle {
    #[serde(flatten)]
    pub properties: ItemProperties,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Backing key name of a certificate-managed secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Item for SecretBundle {
    const KIND: EntityKind = EntityKind::Secret;

    fn properties(&self) -> &ItemProperties {
        &self.properties
    }

    fn properties_mut(&mut self) -> &mut ItemProperties {
        &mut self.properties
    }
}

impl Drop for SecretBundle {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}
