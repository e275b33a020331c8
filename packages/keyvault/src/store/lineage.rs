//! Version history of one name

use crate::model::{Item, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Deletion stamp of a soft-deleted name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deletion {
    pub deleted_at: DateTime<Utc>,
    pub scheduled_purge_at: DateTime<Utc>,
}

/// All versions ever stored under one name, plus its deletion state
#[derive(Debug, Clone)]
pub struct Lineage<T> {
    versions: BTreeMap<u64, T>,
    /// Counter for the next version; survives delete/recover
    next_version: u64,
    deletion: Option<Deletion>,
}

impl<T: Item> Lineage<T> {
    pub fn new() -> Self {
        Self {
            versions: BTreeMap::new(),
            next_version: 1,
            deletion: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deletion.is_some()
    }

    pub fn deletion(&self) -> Option<Deletion> {
        self.deletion
    }

    pub fn set_deletion(&mut self, deletion: Option<Deletion>) {
        self.deletion = deletion;
    }

    /// Append `item` as the newest version
    pub fn push(&mut self, mut item: T) -> T {
        let version = Version::new(self.next_version);
        self.next_version += 1;
        item.properties_mut().version = version;
        self.versions.insert(version.counter(), item.clone());
        item
    }

    pub fn current(&self) -> Option<&T> {
        self.versions.values().next_back()
    }

    pub fn get(&self, version: Version) -> Option<&T> {
        self.versions.get(&version.counter())
    }

    pub fn get_mut(&mut self, version: Version) -> Option<&mut T> {
        self.versions.get_mut(&version.counter())
    }

    /// Newest first
    pub fn versions_desc(&self) -> impl Iterator<Item = &T> {
        self.versions.values().rev()
    }

    /// Apply the deletion stamp to a copy of a stored version
    pub fn decorate(&self, item: &T) -> T {
        let mut item = item.clone();
        let props = item.properties_mut();
        match self.deletion {
            Some(deletion) => {
                props.deleted = true;
                props.deleted_at = Some(deletion.deleted_at);
                props.scheduled_purge_at = Some(deletion.scheduled_purge_at);
            }
            None => {
                props.deleted = false;
                props.deleted_at = None;
                props.scheduled_purge_at = None;
            }
        }
        item
    }

    pub fn to_snapshot(&self, name: &str) -> LineageSnapshot<T> {
        LineageSnapshot {
            name: name.to_string(),
            next_version: self.next_version,
            versions: self.versions.values().cloned().collect(),
        }
    }

    /// Rebuild from a snapshot, keeping its version ids
    pub fn from_snapshot(snapshot: LineageSnapshot<T>) -> Self {
        let mut versions = BTreeMap::new();
        let mut max = 0;
        for item in snapshot.versions {
            let counter = item.version().counter();
            max = max.max(counter);
            versions.insert(counter, item);
        }
        Self {
            versions,
            next_version: snapshot.next_version.max(max + 1),
            deletion: None,
        }
    }
}

impl<T: Item> Default for Lineage<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable whole-lineage export used by backup and restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageSnapshot<T> {
    pub name: String,
    pub next_version: u64,
    pub versions: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemProperties, PropertiesPatch, SecretBundle};

    fn secret(value: &str) -> SecretBundle {
        SecretBundle {
            properties: ItemProperties::new("s1", Utc::now(), &PropertiesPatch::default()),
            value: value.to_string(),
            content_type: None,
            kid: None,
        }
    }

    #[test]
    fn versions_increase_and_current_is_newest() {
        let mut lineage = Lineage::new();
        let first = lineage.push(secret("a"));
        let second = lineage.push(secret("b"));
        assert!(second.version() > first.version());
        assert_eq!(lineage.current().map(|s| s.value.as_str()), Some("b"));
        let order: Vec<_> = lineage.versions_desc().map(|s| s.value.clone()).collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn snapshot_keeps_counter() {
        let mut lineage = Lineage::new();
        lineage.push(secret("a"));
        lineage.push(secret("b"));
        let snapshot = lineage.to_snapshot("s1");
        let mut restored = Lineage::from_snapshot(snapshot);
        let third = restored.push(secret("c"));
        assert_eq!(third.version(), Version::new(3));
    }
}
