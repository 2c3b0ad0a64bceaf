//! Bounded-size eviction, oldest entries first.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use metrics::counter;
use tracing::debug;

use crate::domain::request::RequestKey;

use super::lock::{read_or_recover, write_or_recover};
use super::namespace::NamespaceId;
use super::store::{CacheStore, StoreError};

const METRIC_CACHE_EVICT: &str = "offgrid_cache_evict_total";
const SOURCE: &str = "cache::eviction";

/// Trim the entries of `namespace` selected by `in_scope` down to
/// `max_entries`, deleting the oldest first.
///
/// Keys are listed once and exactly `count - max_entries` deletions are issued.
/// A key already removed by a concurrent trim is not reported. Returns the
/// keys this call removed.
pub async fn trim<F>(
    store: &dyn CacheStore,
    namespace: &NamespaceId,
    max_entries: usize,
    in_scope: F,
) -> Result<Vec<RequestKey>, StoreError>
where
    F: Fn(&RequestKey) -> bool,
{
    let keys: Vec<RequestKey> = store
        .keys(namespace)
        .await?
        .into_iter()
        .filter(|key| in_scope(key))
        .collect();

    if keys.len() <= max_entries {
        return Ok(Vec::new());
    }

    let excess = keys.len() - max_entries;
    let mut removed = Vec::with_capacity(excess);
    for key in keys.into_iter().take(excess) {
        if store.delete(namespace, &key).await? {
            removed.push(key);
        }
    }

    counter!(METRIC_CACHE_EVICT).increment(removed.len() as u64);
    debug!(namespace = %namespace, removed = removed.len(), max_entries, "Trimmed cache namespace");

    Ok(removed)
}

/// Keys written by the bounded media strategy, per namespace.
///
/// Media membership depends on the request destination, which a stored key
/// does not carry, so it is recorded when the entry is written.
#[derive(Debug, Clone, Default)]
pub struct MediaIndex {
    entries: Arc<RwLock<HashMap<NamespaceId, HashSet<RequestKey>>>>,
}

impl MediaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, namespace: &NamespaceId, key: RequestKey) {
        write_or_recover(&self.entries, SOURCE, "record")
            .entry(namespace.clone())
            .or_default()
            .insert(key);
    }

    pub fn contains(&self, namespace: &NamespaceId, key: &RequestKey) -> bool {
        read_or_recover(&self.entries, SOURCE, "contains")
            .get(namespace)
            .is_some_and(|keys| keys.contains(key))
    }

    pub fn forget(&self, namespace: &NamespaceId, removed: &[RequestKey]) {
        let mut guard = write_or_recover(&self.entries, SOURCE, "forget");
        if let Some(keys) = guard.get_mut(namespace) {
            for key in removed {
                keys.remove(key);
            }
        }
    }

    /// Drop the records of every namespace `keep` rejects.
    pub fn retain_namespaces<F>(&self, keep: F)
    where
        F: Fn(&NamespaceId) -> bool,
    {
        write_or_recover(&self.entries, SOURCE, "retain_namespaces")
            .retain(|namespace, _| keep(namespace));
    }

    pub fn len(&self, namespace: &NamespaceId) -> usize {
        read_or_recover(&self.entries, SOURCE, "len")
            .get(namespace)
            .map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::cache::store::MemoryStore;
    use crate::domain::response::ResponseRecord;

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse("https://app.example").unwrap().join(path).unwrap())
    }

    async fn fill(store: &MemoryStore, namespace: &NamespaceId, paths: &[&str]) {
        for path in paths {
            store
                .put(namespace, key(path), ResponseRecord::ok("image/png", path.to_string()))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn trim_removes_exactly_the_oldest_excess() {
        let store = MemoryStore::new();
        let runtime = NamespaceId::from_raw("runtime");
        fill(&store, &runtime, &["/1.png", "/2.png", "/3.png", "/4.png", "/5.png"]).await;

        let removed = trim(&store, &runtime, 2, |_| true).await.unwrap();

        assert_eq!(removed, vec![key("/1.png"), key("/2.png"), key("/3.png")]);
        assert_eq!(
            store.keys(&runtime).await.unwrap(),
            vec![key("/4.png"), key("/5.png")]
        );
    }

    #[tokio::test]
    async fn trim_is_a_noop_within_bound() {
        let store = MemoryStore::new();
        let runtime = NamespaceId::from_raw("runtime");
        fill(&store, &runtime, &["/1.png", "/2.png"]).await;

        assert!(trim(&store, &runtime, 2, |_| true).await.unwrap().is_empty());
        assert!(trim(&store, &runtime, 5, |_| true).await.unwrap().is_empty());
        assert_eq!(store.len(&runtime), 2);
    }

    #[tokio::test]
    async fn retrimming_is_idempotent() {
        let store = MemoryStore::new();
        let runtime = NamespaceId::from_raw("runtime");
        fill(&store, &runtime, &["/1.png", "/2.png", "/3.png"]).await;

        assert_eq!(trim(&store, &runtime, 1, |_| true).await.unwrap().len(), 2);
        assert!(trim(&store, &runtime, 1, |_| true).await.unwrap().is_empty());
        assert_eq!(store.keys(&runtime).await.unwrap(), vec![key("/3.png")]);
    }

    #[tokio::test]
    async fn out_of_scope_entries_are_neither_counted_nor_removed() {
        let store = MemoryStore::new();
        let runtime = NamespaceId::from_raw("runtime");
        fill(&store, &runtime, &["/app.css", "/1.png", "/2.png", "/3.png"]).await;

        let removed = trim(&store, &runtime, 2, |key| key.url().ends_with(".png"))
            .await
            .unwrap();

        assert_eq!(removed, vec![key("/1.png")]);
        assert_eq!(
            store.keys(&runtime).await.unwrap(),
            vec![key("/app.css"), key("/2.png"), key("/3.png")]
        );
    }

    #[tokio::test]
    async fn trimming_a_missing_namespace_does_nothing() {
        let store = MemoryStore::new();
        let missing = NamespaceId::from_raw("missing");
        assert!(trim(&store, &missing, 0, |_| true).await.unwrap().is_empty());
    }

    #[test]
    fn media_index_tracks_keys_per_namespace() {
        let index = MediaIndex::new();
        let v1 = NamespaceId::from_raw("runtime-v1");
        let v2 = NamespaceId::from_raw("runtime-v2");
        index.record(&v1, key("/avatar/1"));
        index.record(&v1, key("/avatar/2"));
        index.record(&v2, key("/avatar/1"));

        index.forget(&v1, &[key("/avatar/1")]);
        assert!(!index.contains(&v1, &key("/avatar/1")));
        assert!(index.contains(&v1, &key("/avatar/2")));
        assert!(index.contains(&v2, &key("/avatar/1")));

        index.retain_namespaces(|namespace| namespace == &v2);
        assert_eq!(index.len(&v1), 0);
        assert_eq!(index.len(&v2), 1);
    }
}
