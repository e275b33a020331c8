//! Versioned, soft-deletable entity store
//!
//! One state machine serves secrets, keys and certificates. Backends implement
//! [`EntityStore::read`] and [`EntityStore::atomically`]; every lifecycle operation
//! is provided on top of those two.

pub mod lineage;
pub mod memory;
pub mod reaper;
pub mod table;
pub mod transaction;

pub use lineage::{Deletion, Lineage, LineageSnapshot};
pub use memory::MemoryStore;
pub use reaper::{PurgeHook, PurgeReaper, ReaperHandle};
pub use table::{NameState, Stored, Table, Tables};
pub use transaction::Transaction;

use crate::error::{EntityKind, VaultError, VaultResult};
use crate::model::{PropertiesPatch, Version};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Paging parameters of a list call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    /// Defaults to and is capped at the store's page size
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub skip_token: Option<String>,
}

impl PageRequest {
    pub fn first(max_results: usize) -> Self {
        Self {
            max_results: Some(max_results),
            skip_token: None,
        }
    }

    /// Request the page following `page`, if there is one
    pub fn next<T>(&self, page: &Page<T>) -> Option<Self> {
        page.skip_token.as_ref().map(|token| Self {
            max_results: self.max_results,
            skip_token: Some(token.clone()),
        })
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` on the last page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_token: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SkipTokenBody {
    offset: usize,
}

/// Opaque pagination cursor
pub struct SkipToken;

impl SkipToken {
    pub fn encode(offset: usize) -> String {
        // serializing a single integer field cannot fail
        let body = serde_json::to_vec(&SkipTokenBody { offset }).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(body)
    }

    pub fn decode(token: &str) -> VaultResult<usize> {
        let invalid = || VaultError::Validation(format!("Invalid skip token '{}'", token));
        let bytes = URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|_| invalid())?;
        let body: SkipTokenBody = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        Ok(body.offset)
    }
}

/// Slice an ordered listing into one page
pub fn paginate<T>(items: Vec<T>, request: &PageRequest, max_page_size: usize) -> VaultResult<Page<T>> {
    let size = match request.max_results {
        Some(0) => return Err(VaultError::validation("maxresults must be at least 1")),
        Some(n) => n.min(max_page_size),
        None => max_page_size,
    };
    let offset = match &request.skip_token {
        Some(token) => SkipToken::decode(token)?,
        None => 0,
    };
    let total = items.len();
    let items: Vec<T> = items.into_iter().skip(offset).take(size).collect();
    let end = offset.saturating_add(items.len());
    let skip_token = (end < total).then(|| SkipToken::encode(end));
    Ok(Page { items, skip_token })
}

/// Storage contract consumed by the services
pub trait EntityStore: Send + Sync + 'static {
    /// Run `f` against a consistent view of every table
    fn read<R, F>(&self, f: F) -> impl Future<Output = R> + Send
    where
        F: FnOnce(&Tables) -> R + Send,
        R: Send;

    /// Run `f` as one transaction; an error rolls back every step it took
    fn atomically<R, F>(&self, f: F) -> impl Future<Output = VaultResult<R>> + Send
    where
        F: FnOnce(&mut Transaction<'_>) -> VaultResult<R> + Send,
        R: Send;

    /// Soft-delete retention
    fn retention(&self) -> chrono::Duration;

    fn max_page_size(&self) -> usize;

    fn create<T: Stored>(&self, name: &str, item: T) -> impl Future<Output = VaultResult<T>> + Send {
        self.atomically(move |tx| tx.create(name, item))
    }

    fn get_current<T: Stored>(&self, name: &str) -> impl Future<Output = VaultResult<T>> + Send {
        self.read(move |tables| T::table(tables).current(name))
    }

    fn get_version<T: Stored>(
        &self,
        name: &str,
        version: Version,
    ) -> impl Future<Output = VaultResult<T>> + Send {
        self.read(move |tables| T::table(tables).version(name, version))
    }

    /// Current versions, name-ascending
    fn list_current<T: Stored>(
        &self,
        page: &PageRequest,
    ) -> impl Future<Output = VaultResult<Page<T>>> + Send {
        let max = self.max_page_size();
        self.read(move |tables| paginate(T::table(tables).list_current(), page, max))
    }

    /// All versions of one name, newest first
    fn list_versions<T: Stored>(
        &self,
        name: &str,
        page: &PageRequest,
    ) -> impl Future<Output = VaultResult<Page<T>>> + Send {
        let max = self.max_page_size();
        self.read(move |tables| paginate(T::table(tables).list_versions(name)?, page, max))
    }

    fn soft_delete<T: Stored>(&self, name: &str) -> impl Future<Output = VaultResult<T>> + Send {
        self.atomically(move |tx| tx.soft_delete::<T>(name))
    }

    fn recover<T: Stored>(&self, name: &str) -> impl Future<Output = VaultResult<T>> + Send {
        self.atomically(move |tx| tx.recover::<T>(name))
    }

    fn purge<T: Stored>(&self, name: &str) -> impl Future<Output = VaultResult<()>> + Send {
        self.atomically(move |tx| tx.purge::<T>(name))
    }

    fn list_deleted<T: Stored>(
        &self,
        page: &PageRequest,
    ) -> impl Future<Output = VaultResult<Page<T>>> + Send {
        let max = self.max_page_size();
        self.read(move |tables| paginate(T::table(tables).list_deleted(), page, max))
    }

    fn get_deleted<T: Stored>(&self, name: &str) -> impl Future<Output = VaultResult<T>> + Send {
        self.read(move |tables| T::table(tables).deleted(name))
    }

    /// Update attributes and tags of one version without creating a new one
    fn update<T: Stored>(
        &self,
        name: &str,
        version: Version,
        patch: PropertiesPatch,
    ) -> impl Future<Output = VaultResult<T>> + Send {
        self.atomically(move |tx| {
            tx.update::<T, _>(name, version, |item| patch.apply(item.properties_mut()))
        })
    }

    fn export<T: Stored>(
        &self,
        name: &str,
    ) -> impl Future<Output = VaultResult<LineageSnapshot<T>>> + Send {
        self.read(move |tables| T::table(tables).export(name))
    }

    fn restore<T: Stored>(
        &self,
        snapshot: LineageSnapshot<T>,
    ) -> impl Future<Output = VaultResult<T>> + Send {
        self.atomically(move |tx| tx.restore(snapshot))
    }

    /// Purge every deleted item whose scheduled purge time is at or before `now`
    fn purge_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = VaultResult<Vec<(EntityKind, String)>>> + Send {
        self.atomically(move |tx| tx.purge_expired(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_token_round_trip_and_rejection() {
        let token = SkipToken::encode(25);
        assert!(!token.contains('='));
        assert_eq!(SkipToken::decode(&token).expect("decode"), 25);
        assert!(matches!(
            SkipToken::decode("not-a-token"),
            Err(VaultError::Validation(_))
        ));
        let wrong_shape = URL_SAFE_NO_PAD.encode(br#"{"page":1}"#);
        assert!(SkipToken::decode(&wrong_shape).is_err());
    }

    #[test]
    fn pages_walk_the_whole_listing() {
        let items: Vec<u32> = (0..7).collect();
        let mut request = PageRequest::first(3);
        let mut seen = Vec::new();
        loop {
            let page = paginate(items.clone(), &request, 25).expect("page");
            seen.extend(page.items.iter().copied());
            match request.next(&page) {
                Some(next) => request = next,
                None => break,
            }
        }
        assert_eq!(seen, items);
    }

    #[test]
    fn page_size_is_capped() {
        let items: Vec<u32> = (0..40).collect();
        let page = paginate(items.clone(), &PageRequest::first(100), 25).expect("page");
        assert_eq!(page.items.len(), 25);
        let page = paginate(items, &PageRequest::default(), 25).expect("page");
        assert_eq!(page.items.len(), 25);
        assert!(page.skip_token.is_some());
        assert!(paginate(vec![1], &PageRequest::first(0), 25).is_err());
    }
}
