//! Undo-logged transactions over the vault tables
//!
//! Every mutation checkpoints the affected lineage first. A transaction that is not
//! committed (error, or a panic unwinding through the closure) replays the undo log in
//! reverse when dropped.

use super::lineage::LineageSnapshot;
use super::table::{NameState, Stored, Table, Tables};
use crate::error::{EntityKind, VaultResult};
use crate::model::{Item, Version};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// Transaction ID generator
static TRANSACTION_COUNTER: AtomicU64 = AtomicU64::new(1);

#[inline]
pub fn next_transaction_id() -> u64 {
    TRANSACTION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type Undo = Box<dyn FnOnce(&mut Tables) + Send>;

/// Exclusive view of the tables for one atomic unit of work
pub struct Transaction<'a> {
    id: u64,
    tables: &'a mut Tables,
    undo: Vec<Undo>,
    now: DateTime<Utc>,
    retention: chrono::Duration,
    committed: bool,
}

impl<'a> Transaction<'a> {
    pub fn begin(tables: &'a mut Tables, now: DateTime<Utc>, retention: chrono::Duration) -> Self {
        Self {
            id: next_transaction_id(),
            tables,
            undo: Vec::new(),
            now,
            retention,
            committed: false,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Timestamp stamped on everything this transaction writes
    #[inline]
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    #[inline]
    pub fn retention(&self) -> chrono::Duration {
        self.retention
    }

    pub fn tables(&self) -> &Tables {
        self.tables
    }

    pub fn table<T: Stored>(&self) -> &Table<T> {
        T::table(self.tables)
    }

    pub fn state<T: Stored>(&self, name: &str) -> NameState {
        self.table::<T>().state(name)
    }

    fn checkpoint<T: Stored>(&mut self, name: &str) {
        let saved = T::table(self.tables).lineage(name).cloned();
        let name = name.to_string();
        self.undo
            .push(Box::new(move |tables| T::table_mut(tables).replace(&name, saved)));
    }

    /// Append a version, stamping creation time and retention
    pub fn create<T: Stored>(&mut self, name: &str, mut item: T) -> VaultResult<T> {
        let now = self.now;
        let retention_days = u32::try_from(self.retention.num_days()).unwrap_or(u32::MAX);
        let props = item.properties_mut();
        props.name = name.to_string();
        props.attributes.created = now;
        props.attributes.updated = now;
        props.attributes.recoverable_days = retention_days;

        self.checkpoint::<T>(name);
        T::table_mut(self.tables).create(name, item)
    }

    /// Modify one version in place and stamp `updated`
    pub fn update<T, F>(&mut self, name: &str, version: Version, f: F) -> VaultResult<T>
    where
        T: Stored,
        F: FnOnce(&mut T),
    {
        let now = self.now;
        self.checkpoint::<T>(name);
        T::table_mut(self.tables).update(name, version, |item| {
            f(item);
            item.properties_mut().attributes.updated = now;
        })
    }

    pub fn soft_delete<T: Stored>(&mut self, name: &str) -> VaultResult<T> {
        self.checkpoint::<T>(name);
        T::table_mut(self.tables).soft_delete(name, self.now, self.retention)
    }

    pub fn recover<T: Stored>(&mut self, name: &str) -> VaultResult<T> {
        self.checkpoint::<T>(name);
        T::table_mut(self.tables).recover(name)
    }

    pub fn purge<T: Stored>(&mut self, name: &str) -> VaultResult<()> {
        self.checkpoint::<T>(name);
        T::table_mut(self.tables).purge(name)
    }

    pub fn restore<T: Stored>(&mut self, snapshot: LineageSnapshot<T>) -> VaultResult<T> {
        let name = snapshot.name.clone();
        self.checkpoint::<T>(&name);
        T::table_mut(self.tables).restore(snapshot)
    }

    /// Purge every deleted name, of any kind, whose purge date is at or before `now`
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> VaultResult<Vec<(EntityKind, String)>> {
        let mut purged = Vec::new();
        purged.extend(self.purge_expired_of::<crate::model::CertificateBundle>(now)?);
        purged.extend(self.purge_expired_of::<crate::model::KeyBundle>(now)?);
        purged.extend(self.purge_expired_of::<crate::model::SecretBundle>(now)?);
        Ok(purged)
    }

    fn purge_expired_of<T: Stored>(
        &mut self,
        now: DateTime<Utc>,
    ) -> VaultResult<Vec<(EntityKind, String)>> {
        let names = self.table::<T>().expired(now);
        for name in &names {
            self.purge::<T>(name)?;
        }
        Ok(names.into_iter().map(|name| (T::KIND, name)).collect())
    }

    /// Keep every change
    pub fn commit(mut self) {
        self.committed = true;
        self.undo.clear();
    }

    /// Discard every change made so far
    pub fn rollback(mut self) {
        self.undo_all();
    }

    fn undo_all(&mut self) {
        while let Some(undo) = self.undo.pop() {
            undo(self.tables);
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.undo.is_empty() {
            tracing::debug!(
                transaction = self.id,
                steps = self.undo.len(),
                "Rolling back uncommitted transaction"
            );
            self.undo_all();
        }
    }
}
