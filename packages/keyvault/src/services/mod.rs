//! Secret, key and certificate operations on top of the entity store

pub mod certificates;
pub mod keys;
pub mod secrets;

pub use certificates::CertificateService;
pub use keys::KeyService;
pub use secrets::SecretService;

use crate::envelope::Envelope;
use crate::error::{EntityKind, VaultError, VaultResult};
use crate::store::{LineageSnapshot, NameState, Stored, Tables};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// State shared by every service of one vault
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub vault_url: Arc<str>,
    pub envelope: Envelope,
}

impl ServiceContext {
    pub fn new(vault_url: &str, envelope: Envelope) -> Self {
        Self {
            vault_url: Arc::from(vault_url.trim_end_matches('/')),
            envelope,
        }
    }
}

/// Backup payload of a single secret or key name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ItemBackup<T> {
    pub kind: EntityKind,
    pub lineage: LineageSnapshot<T>,
}

impl<T: Stored> ItemBackup<T> {
    pub fn new(lineage: LineageSnapshot<T>) -> Self {
        Self {
            kind: T::KIND,
            lineage,
        }
    }

    /// Reject blobs produced for another item kind
    pub fn into_lineage(self) -> VaultResult<LineageSnapshot<T>> {
        if self.kind != T::KIND {
            return Err(VaultError::Deserialization(format!(
                "Backup holds a {}, expected a {}",
                self.kind,
                T::KIND
            )));
        }
        Ok(self.lineage)
    }
}

/// Whether the newest version under `name` (active or deleted) is certificate-managed
pub(crate) fn is_managed<T: Stored>(tables: &Tables, name: &str) -> bool {
    let table = T::table(tables);
    let current = match table.state(name) {
        NameState::Active => table.current(name).ok(),
        NameState::Deleted => table.deleted(name).ok(),
        NameState::Absent => None,
    };
    current.is_some_and(|item| item.properties().managed)
}

/// Refuse direct changes to a certificate's backing key or secret
pub(crate) fn ensure_unmanaged<T: Stored>(tables: &Tables, name: &str) -> VaultResult<()> {
    if is_managed::<T>(tables, name) {
        return Err(VaultError::conflict(
            T::KIND,
            name,
            "item is managed by a certificate; change it through the certificate",
        ));
    }
    Ok(())
}

/// Refuse creating under a deleted name before doing expensive work
pub(crate) fn ensure_not_deleted<T: Stored>(tables: &Tables, name: &str) -> VaultResult<()> {
    if T::table(tables).state(name) == NameState::Deleted {
        return Err(VaultError::conflict(
            T::KIND,
            name,
            "name is deleted but recoverable; recover or purge it first",
        ));
    }
    Ok(())
}
