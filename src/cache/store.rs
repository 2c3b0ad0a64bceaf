//! Cache store capability.
//!
//! The engine never touches entry storage directly; every read and write goes
//! through a [`CacheStore`]. [`MemoryStore`] is the in-process implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;

use crate::domain::request::RequestKey;
use crate::domain::response::ResponseRecord;

use super::lock::{read_or_recover, write_or_recover};
use super::namespace::NamespaceId;

const SOURCE: &str = "cache::store";

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("cache namespace `{0}` is unavailable")]
    Unavailable(NamespaceId),
    #[error("cache backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

/// Namespaced key to response storage.
///
/// Entries of a namespace keep their insertion order. A `put` always moves the
/// written key to the newest position, even when it replaces an existing entry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Create the namespace if it does not exist yet.
    async fn open(&self, namespace: &NamespaceId) -> Result<(), StoreError>;

    async fn get(
        &self,
        namespace: &NamespaceId,
        key: &RequestKey,
    ) -> Result<Option<ResponseRecord>, StoreError>;

    /// Insert or replace an entry, opening the namespace lazily.
    async fn put(
        &self,
        namespace: &NamespaceId,
        key: RequestKey,
        response: ResponseRecord,
    ) -> Result<(), StoreError>;

    /// Remove an entry. Returns `false` when nothing was stored under `key`.
    async fn delete(&self, namespace: &NamespaceId, key: &RequestKey) -> Result<bool, StoreError>;

    /// Keys of a namespace, oldest first. Unknown namespaces have no keys.
    async fn keys(&self, namespace: &NamespaceId) -> Result<Vec<RequestKey>, StoreError>;

    /// Drop a namespace and every entry in it. Returns `false` when it did not exist.
    async fn delete_namespace(&self, namespace: &NamespaceId) -> Result<bool, StoreError>;

    async fn namespaces(&self) -> Result<Vec<NamespaceId>, StoreError>;
}

/// In-memory [`CacheStore`].
///
/// Each namespace is an unbounded [`LruCache`] used purely for its ordering:
/// reads peek without touching recency, writes move the key to the front.
pub struct MemoryStore {
    namespaces: RwLock<HashMap<NamespaceId, LruCache<RequestKey, ResponseRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries in a namespace.
    pub fn len(&self, namespace: &NamespaceId) -> usize {
        read_or_recover(&self.namespaces, SOURCE, "len")
            .get(namespace)
            .map_or(0, LruCache::len)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn open(&self, namespace: &NamespaceId) -> Result<(), StoreError> {
        write_or_recover(&self.namespaces, SOURCE, "open")
            .entry(namespace.clone())
            .or_insert_with(LruCache::unbounded);
        Ok(())
    }

    async fn get(
        &self,
        namespace: &NamespaceId,
        key: &RequestKey,
    ) -> Result<Option<ResponseRecord>, StoreError> {
        Ok(read_or_recover(&self.namespaces, SOURCE, "get")
            .get(namespace)
            .and_then(|entries| entries.peek(key))
            .cloned())
    }

    async fn put(
        &self,
        namespace: &NamespaceId,
        key: RequestKey,
        response: ResponseRecord,
    ) -> Result<(), StoreError> {
        let mut guard = write_or_recover(&self.namespaces, SOURCE, "put");
        let entries = guard
            .entry(namespace.clone())
            .or_insert_with(LruCache::unbounded);
        // Replacing an existing key must not keep its old position.
        entries.pop(&key);
        entries.put(key, response);
        Ok(())
    }

    async fn delete(&self, namespace: &NamespaceId, key: &RequestKey) -> Result<bool, StoreError> {
        Ok(write_or_recover(&self.namespaces, SOURCE, "delete")
            .get_mut(namespace)
            .and_then(|entries| entries.pop(key))
            .is_some())
    }

    async fn keys(&self, namespace: &NamespaceId) -> Result<Vec<RequestKey>, StoreError> {
        Ok(read_or_recover(&self.namespaces, SOURCE, "keys")
            .get(namespace)
            .map(|entries| entries.iter().rev().map(|(key, _)| key.clone()).collect())
            .unwrap_or_default())
    }

    async fn delete_namespace(&self, namespace: &NamespaceId) -> Result<bool, StoreError> {
        Ok(write_or_recover(&self.namespaces, SOURCE, "delete_namespace")
            .remove(namespace)
            .is_some())
    }

    async fn namespaces(&self) -> Result<Vec<NamespaceId>, StoreError> {
        let mut ids: Vec<NamespaceId> = read_or_recover(&self.namespaces, SOURCE, "namespaces")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use url::Url;

    use super::*;

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse("https://app.example").unwrap().join(path).unwrap())
    }

    fn ns(name: &str) -> NamespaceId {
        NamespaceId::from_raw(name)
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let store = MemoryStore::new();
        let runtime = ns("runtime");

        assert!(store.get(&runtime, &key("/a.png")).await.unwrap().is_none());

        store
            .put(&runtime, key("/a.png"), ResponseRecord::ok("image/png", "a"))
            .await
            .unwrap();

        let cached = store.get(&runtime, &key("/a.png")).await.unwrap().unwrap();
        assert_eq!(cached.body().as_ref(), b"a");
        assert_eq!(store.namespaces().await.unwrap(), vec![runtime]);
    }

    #[tokio::test]
    async fn keys_are_listed_oldest_first_and_rewrites_become_newest() {
        let store = MemoryStore::new();
        let runtime = ns("runtime");

        for path in ["/1.png", "/2.png", "/3.png"] {
            store
                .put(&runtime, key(path), ResponseRecord::ok("image/png", path))
                .await
                .unwrap();
        }

        // Reads never reorder.
        store.get(&runtime, &key("/1.png")).await.unwrap();
        assert_eq!(
            store.keys(&runtime).await.unwrap(),
            vec![key("/1.png"), key("/2.png"), key("/3.png")]
        );

        store
            .put(&runtime, key("/1.png"), ResponseRecord::ok("image/png", "new"))
            .await
            .unwrap();
        assert_eq!(
            store.keys(&runtime).await.unwrap(),
            vec![key("/2.png"), key("/3.png"), key("/1.png")]
        );
    }

    #[tokio::test]
    async fn deletes_are_idempotent() {
        let store = MemoryStore::new();
        let runtime = ns("runtime");
        store
            .put(&runtime, key("/a.css"), ResponseRecord::ok("text/css", "a"))
            .await
            .unwrap();

        assert!(store.delete(&runtime, &key("/a.css")).await.unwrap());
        assert!(!store.delete(&runtime, &key("/a.css")).await.unwrap());
        assert!(!store.delete(&ns("missing"), &key("/a.css")).await.unwrap());

        assert!(store.delete_namespace(&runtime).await.unwrap());
        assert!(!store.delete_namespace(&runtime).await.unwrap());
        assert!(store.keys(&runtime).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_creates_empty_namespace() {
        let store = MemoryStore::new();
        store.open(&ns("precache")).await.unwrap();
        store.open(&ns("precache")).await.unwrap();
        assert_eq!(store.namespaces().await.unwrap(), vec![ns("precache")]);
        assert_eq!(store.len(&ns("precache")), 0);
    }

    #[tokio::test]
    async fn store_recovers_from_poisoned_lock() {
        let store = MemoryStore::new();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .namespaces
                .write()
                .expect("namespaces lock should be acquired");
            panic!("poison namespaces lock");
        }));

        store
            .put(&ns("runtime"), key("/a.js"), ResponseRecord::ok("text/javascript", "1"))
            .await
            .unwrap();
        assert_eq!(store.len(&ns("runtime")), 1);
    }
}
