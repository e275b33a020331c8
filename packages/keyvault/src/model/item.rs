//! Properties shared by every stored item kind

use crate::error::{EntityKind, VaultError};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Version identifier of one item version.
///
/// Wraps the per-name counter; rendered as 32 lowercase hex characters so clients
/// treat it as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(u64);

impl Version {
    /// Placeholder carried by an item before the store assigns its version
    pub const UNASSIGNED: Version = Version(0);

    pub fn new(counter: u64) -> Self {
        Self(counter)
    }

    pub fn counter(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(u128::from(self.0).to_be_bytes()))
    }
}

impl FromStr for Version {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| VaultError::Validation(format!("'{}' is not a version identifier", s)))?;
        let counter = u64::try_from(u128::from_be_bytes(bytes))
            .map_err(|_| VaultError::Validation(format!("Version '{}' is out of range", s)))?;
        Ok(Self(counter))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Fixed attribute set of one item version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attributes {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub recoverable_days: u32,
}

impl Attributes {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            not_before: None,
            expires: None,
            created: now,
            updated: now,
            recoverable_days: 0,
        }
    }

    /// Whether the validity window admits `now`
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> Result<(), &'static str> {
        if !self.enabled {
            return Err("item is disabled");
        }
        if matches!(self.not_before, Some(nbf) if now < nbf) {
            return Err("item is not yet valid");
        }
        if matches!(self.expires, Some(exp) if now >= exp) {
            return Err("item has expired");
        }
        Ok(())
    }
}

/// Caller-settable attributes for creates and updates.
///
/// `None` leaves a field untouched on update and takes the default on create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertiesPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl PropertiesPatch {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }

    pub fn expires(mut self, at: DateTime<Utc>) -> Self {
        self.expires = Some(at);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Apply onto existing properties
    pub fn apply(&self, props: &mut ItemProperties) {
        if let Some(enabled) = self.enabled {
            props.attributes.enabled = enabled;
        }
        if self.not_before.is_some() {
            props.attributes.not_before = self.not_before;
        }
        if self.expires.is_some() {
            props.attributes.expires = self.expires;
        }
        if let Some(tags) = &self.tags {
            props.tags = tags.clone();
        }
    }
}

/// Name, version, attributes and lifecycle markers of one item version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemProperties {
    pub name: String,
    pub version: Version,
    pub attributes: Attributes,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Owned by a certificate
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_purge_at: Option<DateTime<Utc>>,
}

impl ItemProperties {
    /// Fresh properties for an item about to be stored
    pub fn new(name: impl Into<String>, now: DateTime<Utc>, patch: &PropertiesPatch) -> Self {
        let mut props = Self {
            name: name.into(),
            version: Version::UNASSIGNED,
            attributes: Attributes::new(now),
            tags: BTreeMap::new(),
            managed: false,
            deleted: false,
            deleted_at: None,
            scheduled_purge_at: None,
        };
        patch.apply(&mut props);
        props
    }

    pub fn managed(mut self) -> Self {
        self.managed = true;
        self
    }
}

/// A storable, versioned item
pub trait Item: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn properties(&self) -> &ItemProperties;

    fn properties_mut(&mut self) -> &mut ItemProperties;

    fn name(&self) -> &str {
        &self.properties().name
    }

    fn version(&self) -> Version {
        self.properties().version
    }

    /// `{vault_url}/{collection}/{name}/{version}`
    fn id(&self, vault_url: &str) -> String {
        item_id(vault_url, Self::KIND, self.name(), Some(self.version()))
    }
}

/// Build an item identifier; without a version it names the item as a whole
pub fn item_id(vault_url: &str, kind: EntityKind, name: &str, version: Option<Version>) -> String {
    let base = vault_url.trim_end_matches('/');
    match version {
        Some(version) => format!("{}/{}/{}/{}", base, kind.collection(), name, version),
        None => format!("{}/{}/{}", base, kind.collection(), name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_opaque_hex() {
        let v = Version::new(10);
        let text = v.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(text, "0000000000000000000000000000000a");
        assert_eq!(text.parse::<Version>().ok(), Some(v));
        assert!("xyz".parse::<Version>().is_err());
        assert!("0000000000000000000000000000000".parse::<Version>().is_err());
        assert!("ffffffffffffffff0000000000000000".parse::<Version>().is_err());
        assert_eq!(
            "000000000000000000000000000000ff".parse::<Version>().ok(),
            Some(Version::new(255))
        );
        assert!(Version::new(2) > Version::new(1));
    }

    #[test]
    fn usability_window() {
        let now = Utc::now();
        let mut attrs = Attributes::new(now);
        assert!(attrs.is_usable_at(now).is_ok());

        attrs.expires = Some(now);
        assert!(attrs.is_usable_at(now).is_err());

        attrs.expires = None;
        attrs.not_before = Some(now + chrono::Duration::hours(1));
        assert!(attrs.is_usable_at(now).is_err());

        attrs.not_before = None;
        attrs.enabled = false;
        assert!(attrs.is_usable_at(now).is_err());
    }

    #[test]
    fn identifiers() {
        assert_eq!(
            item_id("https://v.test/", EntityKind::Key, "k1", Some(Version::new(1))),
            "https://v.test/keys/k1/00000000000000000000000000000001"
        );
        assert_eq!(
            item_id("https://v.test", EntityKind::Certificate, "c1", None),
            "https://v.test/certificates/c1"
        );
    }
}
