//! Item kinds stored by the vault

pub mod certificate;
pub mod item;
pub mod key;
pub mod secret;

pub use certificate::{
    BackingRef, CertificateBundle, CertificateOperation, CertificatePolicy, IssuerParameters,
    KeyUsage, OperationStatus, SecretEncoding, SubjectAlternativeNames, ISSUER_SELF, ISSUER_UNKNOWN,
};
pub use item::{item_id, Attributes, Item, ItemProperties, PropertiesPatch, Version};
pub use key::{
    JsonWebKey, KeyBundle, KeyMaterial, KeyOperation, KeyReleasePolicy, KeyRotationPolicy, KeyType,
    LifetimeAction, RotationAction, RotationTrigger,
};
pub use secret::{SecretBundle, CONTENT_TYPE_PEM, CONTENT_TYPE_PKCS12};

/// Serde adapters storing binary fields as base64url without padding
pub(crate) mod serde_b64 {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(raw.as_bytes())
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            bytes: &Option<Vec<u8>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => super::serialize(bytes, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Vec<u8>>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            raw.map(|s| {
                URL_SAFE_NO_PAD
                    .decode(s.as_bytes())
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
        }
    }
}
