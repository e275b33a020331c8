//! In-memory store backend

use super::table::Tables;
use super::transaction::Transaction;
use super::EntityStore;
use crate::error::VaultResult;
use chrono::Utc;
use std::future::Future;
use tokio::sync::RwLock;

/// Store holding every table behind one lock.
///
/// Writers are fully serialized and each transaction runs synchronously while the
/// write guard is held, so readers only ever see committed state and a dropped
/// future cannot leave a half-applied transaction behind.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    retention: chrono::Duration,
    max_page_size: usize,
}

impl MemoryStore {
    pub fn new(retention: chrono::Duration, max_page_size: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            retention,
            max_page_size: max_page_size.max(1),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(chrono::Duration::days(90), 25)
    }
}

impl EntityStore for MemoryStore {
    fn read<R, F>(&self, f: F) -> impl Future<Output = R> + Send
    where
        F: FnOnce(&Tables) -> R + Send,
        R: Send,
    {
        async move {
            let guard = self.tables.read().await;
            f(&guard)
        }
    }

    fn atomically<R, F>(&self, f: F) -> impl Future<Output = VaultResult<R>> + Send
    where
        F: FnOnce(&mut Transaction<'_>) -> VaultResult<R> + Send,
        R: Send,
    {
        async move {
            let mut guard = self.tables.write().await;
            let mut tx = Transaction::begin(&mut guard, Utc::now(), self.retention);
            match f(&mut tx) {
                Ok(value) => {
                    tx.commit();
                    Ok(value)
                }
                Err(e) => {
                    tracing::debug!(transaction = tx.id(), error = %e, "Transaction rolled back");
                    tx.rollback();
                    Err(e)
                }
            }
        }
    }

    fn retention(&self) -> chrono::Duration {
        self.retention
    }

    fn max_page_size(&self) -> usize {
        self.max_page_size
    }
}
