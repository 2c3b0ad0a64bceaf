//! Precache warm-up from a fixed manifest.

use std::sync::Arc;
use std::time::Instant;

use axum::http::Method;
use futures::future::try_join_all;
use metrics::histogram;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use crate::domain::request::{RequestKey, RequestMeta};
use crate::domain::response::ResponseRecord;

use super::namespace::NamespaceId;
use super::network::Fetcher;
use super::store::{CacheStore, StoreError};

const METRIC_WARMUP_MS: &str = "offgrid_warmup_ms";

#[derive(Debug, Error)]
pub enum WarmUpError {
    #[error("manifest entry `{entry}` is not a valid url: {reason}")]
    InvalidEntry { entry: String, reason: String },
    #[error("precache incomplete, `{url}` could not be fetched: {reason}")]
    Incomplete { url: String, reason: String },
    #[error("failed to commit precache `{namespace}`: {source}")]
    Store {
        namespace: NamespaceId,
        #[source]
        source: StoreError,
    },
}

impl WarmUpError {
    fn incomplete(url: &Url, reason: impl ToString) -> Self {
        Self::Incomplete {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Ordered list of URLs to precache. Relative entries resolve against the
/// origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    urls: Vec<String>,
}

impl Manifest {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn resolve(&self, origin: &Url) -> Result<Vec<Url>, WarmUpError> {
        self.urls
            .iter()
            .map(|entry| {
                origin.join(entry).map_err(|err| WarmUpError::InvalidEntry {
                    entry: entry.clone(),
                    reason: err.to_string(),
                })
            })
            .collect()
    }
}

/// Populates a precache namespace from a manifest.
///
/// Every manifest URL is fetched before anything is written. A single failed
/// or non-2xx fetch fails the whole warm-up and leaves the namespace
/// untouched; a failure while committing deletes the namespace so no partial
/// precache survives.
pub struct WarmUpController {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
}

impl WarmUpController {
    pub fn new(store: Arc<dyn CacheStore>, fetcher: Arc<dyn Fetcher>, origin: Url) -> Self {
        Self {
            store,
            fetcher,
            origin,
        }
    }

    /// Warm `precache` with every manifest entry. Returns the number of
    /// entries written.
    #[instrument(skip_all, fields(namespace = %precache, entries = manifest.len()))]
    pub async fn warm_up(
        &self,
        precache: &NamespaceId,
        manifest: &Manifest,
    ) -> Result<usize, WarmUpError> {
        let started_at = Instant::now();
        let urls = manifest.resolve(&self.origin)?;

        let entries = try_join_all(urls.iter().map(|url| self.fetch_entry(url))).await?;
        let written = entries.len();

        if let Err(source) = self.commit(precache, entries).await {
            if let Err(err) = self.store.delete_namespace(precache).await {
                warn!(namespace = %precache, error = %err, "Failed to discard partial precache");
            }
            return Err(WarmUpError::Store {
                namespace: precache.clone(),
                source,
            });
        }

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_WARMUP_MS).record(elapsed_ms);
        info!(written, elapsed_ms, "Precache warmed");

        Ok(written)
    }

    async fn fetch_entry(&self, url: &Url) -> Result<(RequestKey, ResponseRecord), WarmUpError> {
        let request = RequestMeta::new(Method::GET, url.clone());
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|err| WarmUpError::incomplete(url, err))?;

        if !response.status().is_success() {
            return Err(WarmUpError::incomplete(
                url,
                format!("unexpected status {}", response.status()),
            ));
        }

        Ok((request.key(), response))
    }

    async fn commit(
        &self,
        precache: &NamespaceId,
        entries: Vec<(RequestKey, ResponseRecord)>,
    ) -> Result<(), StoreError> {
        self.store.open(precache).await?;
        for (key, response) in entries {
            self.store.put(precache, key, response).await?;
        }
        Ok(())
    }
}
