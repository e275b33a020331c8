//! Per-kind name table implementing the lifecycle state machine

use super::lineage::{Deletion, Lineage, LineageSnapshot};
use crate::error::{VaultError, VaultResult};
use crate::model::{CertificateBundle, Item, KeyBundle, SecretBundle, Version};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Lifecycle state of a name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameState {
    /// Never created, or purged
    Absent,
    Active,
    Deleted,
}

/// Every name of one item kind, ordered by name
#[derive(Debug, Clone)]
pub struct Table<T> {
    names: BTreeMap<String, Lineage<T>>,
}

impl<T: Item> Default for Table<T> {
    fn default() -> Self {
        Self {
            names: BTreeMap::new(),
        }
    }
}

impl<T: Item> Table<T> {
    pub fn state(&self, name: &str) -> NameState {
        match self.names.get(name) {
            None => NameState::Absent,
            Some(lineage) if lineage.is_deleted() => NameState::Deleted,
            Some(_) => NameState::Active,
        }
    }

    fn not_found(name: &str, version: Option<Version>) -> VaultError {
        VaultError::not_found(T::KIND, name, version.as_ref())
    }

    fn active(&self, name: &str) -> VaultResult<&Lineage<T>> {
        match self.names.get(name) {
            Some(lineage) if !lineage.is_deleted() => Ok(lineage),
            _ => Err(Self::not_found(name, None)),
        }
    }

    fn active_mut(&mut self, name: &str) -> VaultResult<&mut Lineage<T>> {
        match self.names.get_mut(name) {
            Some(lineage) if !lineage.is_deleted() => Ok(lineage),
            _ => Err(Self::not_found(name, None)),
        }
    }

    fn deleted_lineage(&self, name: &str) -> VaultResult<&Lineage<T>> {
        match self.names.get(name) {
            Some(lineage) if lineage.is_deleted() => Ok(lineage),
            _ => Err(Self::not_found(name, None)),
        }
    }

    /// Append a version. Unknown names start at version 1; deleted names conflict.
    pub fn create(&mut self, name: &str, item: T) -> VaultResult<T> {
        if self.state(name) == NameState::Deleted {
            return Err(VaultError::conflict(
                T::KIND,
                name,
                "name is deleted but recoverable; recover or purge it first",
            ));
        }
        let lineage = self.names.entry(name.to_string()).or_default();
        Ok(lineage.push(item))
    }

    pub fn current(&self, name: &str) -> VaultResult<T> {
        let lineage = self.active(name)?;
        lineage
            .current()
            .map(|item| lineage.decorate(item))
            .ok_or_else(|| Self::not_found(name, None))
    }

    pub fn version(&self, name: &str, version: Version) -> VaultResult<T> {
        let lineage = self
            .active(name)
            .map_err(|_| Self::not_found(name, Some(version)))?;
        lineage
            .get(version)
            .map(|item| lineage.decorate(item))
            .ok_or_else(|| Self::not_found(name, Some(version)))
    }

    /// Current version of every active name, name-ascending
    pub fn list_current(&self) -> Vec<T> {
        self.names
            .values()
            .filter(|lineage| !lineage.is_deleted())
            .filter_map(|lineage| lineage.current().map(|item| lineage.decorate(item)))
            .collect()
    }

    /// All versions of an active name, newest first
    pub fn list_versions(&self, name: &str) -> VaultResult<Vec<T>> {
        let lineage = self.active(name)?;
        Ok(lineage
            .versions_desc()
            .map(|item| lineage.decorate(item))
            .collect())
    }

    /// Mutate one stored version in place
    pub fn update<F>(&mut self, name: &str, version: Version, f: F) -> VaultResult<T>
    where
        F: FnOnce(&mut T),
    {
        let lineage = self
            .active_mut(name)
            .map_err(|_| Self::not_found(name, Some(version)))?;
        let item = lineage
            .get_mut(version)
            .ok_or_else(|| Self::not_found(name, Some(version)))?;
        f(item);
        let item = item.clone();
        Ok(lineage.decorate(&item))
    }

    pub fn soft_delete(
        &mut self,
        name: &str,
        now: DateTime<Utc>,
        retention: chrono::Duration,
    ) -> VaultResult<T> {
        let lineage = self.active_mut(name)?;
        lineage.set_deletion(Some(Deletion {
            deleted_at: now,
            scheduled_purge_at: now + retention,
        }));
        lineage
            .current()
            .map(|item| lineage.decorate(item))
            .ok_or_else(|| Self::not_found(name, None))
    }

    pub fn recover(&mut self, name: &str) -> VaultResult<T> {
        let lineage = match self.names.get_mut(name) {
            Some(lineage) if lineage.is_deleted() => lineage,
            _ => return Err(Self::not_found(name, None)),
        };
        lineage.set_deletion(None);
        lineage
            .current()
            .map(|item| lineage.decorate(item))
            .ok_or_else(|| Self::not_found(name, None))
    }

    /// Remove a deleted name entirely
    pub fn purge(&mut self, name: &str) -> VaultResult<()> {
        self.deleted_lineage(name)?;
        self.names.remove(name);
        Ok(())
    }

    /// Current version of a deleted name, with its deletion stamp
    pub fn deleted(&self, name: &str) -> VaultResult<T> {
        let lineage = self.deleted_lineage(name)?;
        lineage
            .current()
            .map(|item| lineage.decorate(item))
            .ok_or_else(|| Self::not_found(name, None))
    }

    pub fn list_deleted(&self) -> Vec<T> {
        self.names
            .values()
            .filter(|lineage| lineage.is_deleted())
            .filter_map(|lineage| lineage.current().map(|item| lineage.decorate(item)))
            .collect()
    }

    /// Whole history of an active name
    pub fn export(&self, name: &str) -> VaultResult<LineageSnapshot<T>> {
        Ok(self.active(name)?.to_snapshot(name))
    }

    /// Reinstate an exported history.
    ///
    /// Identical content on an active name is a no-op; any other occupied name conflicts.
    pub fn restore(&mut self, snapshot: LineageSnapshot<T>) -> VaultResult<T> {
        validate_snapshot(&snapshot)?;
        let name = snapshot.name.clone();
        match self.state(&name) {
            NameState::Deleted => Err(VaultError::conflict(
                T::KIND,
                &name,
                "name is deleted but recoverable; purge it before restoring",
            )),
            NameState::Active => {
                let existing = self.export(&name)?;
                if same_content(&existing, &snapshot)? {
                    self.current(&name)
                } else {
                    Err(VaultError::conflict(
                        T::KIND,
                        &name,
                        "name already exists with different content",
                    ))
                }
            }
            NameState::Absent => {
                self.names
                    .insert(name.clone(), Lineage::from_snapshot(snapshot));
                self.current(&name)
            }
        }
    }

    /// Deleted names whose purge date has passed
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<String> {
        self.names
            .iter()
            .filter(|(_, lineage)| {
                matches!(lineage.deletion(), Some(d) if d.scheduled_purge_at <= now)
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Raw lineage, for transaction checkpoints
    pub fn lineage(&self, name: &str) -> Option<&Lineage<T>> {
        self.names.get(name)
    }

    /// Put a checkpointed lineage back, or remove the name when there was none
    pub fn replace(&mut self, name: &str, lineage: Option<Lineage<T>>) {
        match lineage {
            Some(lineage) => {
                self.names.insert(name.to_string(), lineage);
            }
            None => {
                self.names.remove(name);
            }
        }
    }
}

fn validate_snapshot<T: Item>(snapshot: &LineageSnapshot<T>) -> VaultResult<()> {
    if snapshot.versions.is_empty() {
        return Err(VaultError::validation("Backup contains no versions"));
    }
    let mut seen = std::collections::BTreeSet::new();
    for item in &snapshot.versions {
        if item.name() != snapshot.name {
            return Err(VaultError::Validation(format!(
                "Backup version belongs to '{}', expected '{}'",
                item.name(),
                snapshot.name
            )));
        }
        if item.version() == Version::UNASSIGNED || !seen.insert(item.version()) {
            return Err(VaultError::validation("Backup has invalid version ids"));
        }
    }
    Ok(())
}

fn same_content<T: Item>(a: &LineageSnapshot<T>, b: &LineageSnapshot<T>) -> VaultResult<bool> {
    let encode = |snapshot: &LineageSnapshot<T>| {
        serde_json::to_value(&snapshot.versions)
            .map_err(|e| VaultError::Internal(format!("Snapshot serialization failed: {}", e)))
    };
    Ok(encode(a)? == encode(b)?)
}

/// Every table the vault keeps
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub secrets: Table<SecretBundle>,
    pub keys: Table<KeyBundle>,
    pub certificates: Table<CertificateBundle>,
}

/// Items that live in one of the vault's tables
pub trait Stored: Item {
    fn table(tables: &Tables) -> &Table<Self>;

    fn table_mut(tables: &mut Tables) -> &mut Table<Self>;
}

impl Stored for SecretBundle {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.secrets
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.secrets
    }
}

impl Stored for KeyBundle {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.keys
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.keys
    }
}

impl Stored for CertificateBundle {
    fn table(tables: &Tables) -> &Table<Self> {
        &tables.certificates
    }

    fn table_mut(tables: &mut Tables) -> &mut Table<Self> {
        &mut tables.certificates
    }
}
