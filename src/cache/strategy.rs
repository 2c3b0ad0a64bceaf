//! Caching strategies, one per request class.
//!
//! | class           | strategy                              |
//! |-----------------|---------------------------------------|
//! | Navigation      | network-first, navigation root key    |
//! | ApiCall         | network-first, request key            |
//! | Media           | cache-first, bounded, fallback image  |
//! | StyleOrScript   | stale-while-revalidate                |
//! | Default         | stale-while-revalidate                |

use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use metrics::counter;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::domain::request::{RequestKey, RequestMeta};
use crate::domain::response::ResponseRecord;
use crate::domain::types::{RequestClass, ResponseSource};

use super::background::BackgroundTasks;
use super::classify::Classifier;
use super::config::CacheConfig;
use super::eviction::{self, MediaIndex};
use super::namespace::{NamespaceManager, NamespaceRole};
use super::network::{FetchError, Fetcher};
use super::store::StoreError;

const METRIC_REQUEST: &str = "offgrid_request_total";
const METRIC_NETWORK_FAILURE: &str = "offgrid_network_failure_total";
const METRIC_CACHE_MISS: &str = "offgrid_cache_miss_total";

const RUNTIME_THEN_PRECACHE: [NamespaceRole; 2] = [NamespaceRole::Runtime, NamespaceRole::Precache];

#[derive(Debug, Clone, Error)]
pub enum StrategyError {
    #[error("network unavailable: {0}")]
    NetworkUnavailable(#[source] FetchError),
    #[error("offline, no cached copy of {key}")]
    CacheMiss { key: RequestKey },
}

/// A response produced by a strategy.
#[derive(Debug, Clone)]
pub struct Served {
    pub class: RequestClass,
    pub source: ResponseSource,
    pub response: ResponseRecord,
}

impl Served {
    fn new(class: RequestClass, source: ResponseSource, response: ResponseRecord) -> Self {
        Self {
            class,
            source,
            response,
        }
    }
}

impl From<NamespaceRole> for ResponseSource {
    fn from(role: NamespaceRole) -> Self {
        match role {
            NamespaceRole::Precache => Self::Precache,
            NamespaceRole::Runtime => Self::Runtime,
        }
    }
}

/// Strategy parameters with every path resolved against the origin.
#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub network_timeout: Duration,
    pub media_max_entries: usize,
    /// Fixed key under which navigations are cached and looked up.
    pub navigation_root: RequestKey,
    pub fallback_image: Option<RequestKey>,
    pub offline_root_fallback: bool,
}

impl StrategySettings {
    pub fn resolve(config: &CacheConfig, origin: &Url) -> Result<Self, url::ParseError> {
        let navigation_root = RequestKey::get(&origin.join(&config.navigation_root)?);
        let fallback_image = config
            .fallback_image
            .as_deref()
            .map(|path| origin.join(path).map(|url| RequestKey::get(&url)))
            .transpose()?;

        Ok(Self {
            network_timeout: config.network_timeout(),
            media_max_entries: config.media_max_entries_non_zero().get(),
            navigation_root,
            fallback_image,
            offline_root_fallback: config.offline_root_fallback,
        })
    }
}

/// Runs the caching algorithm matching a request class.
///
/// Entries are only ever touched through the store held by the namespace
/// manager. Writes that follow a response run as background tasks.
#[derive(Clone)]
pub struct StrategyExecutor {
    namespaces: NamespaceManager,
    fetcher: Arc<dyn Fetcher>,
    classifier: Arc<Classifier>,
    settings: StrategySettings,
    background: BackgroundTasks,
    media: MediaIndex,
}

impl StrategyExecutor {
    pub fn new(
        namespaces: NamespaceManager,
        fetcher: Arc<dyn Fetcher>,
        classifier: Arc<Classifier>,
        settings: StrategySettings,
        background: BackgroundTasks,
    ) -> Self {
        Self {
            namespaces,
            fetcher,
            classifier,
            settings,
            background,
            media: MediaIndex::new(),
        }
    }

    /// Share the record of bounded media entries with other executors
    /// writing the same runtime namespace.
    pub fn with_media_index(mut self, media: MediaIndex) -> Self {
        self.media = media;
        self
    }

    pub fn media_index(&self) -> &MediaIndex {
        &self.media
    }

    pub fn namespaces(&self) -> &NamespaceManager {
        &self.namespaces
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    /// Classify `request` and serve it with the matching strategy.
    pub async fn handle(&self, request: &RequestMeta) -> Result<Served, StrategyError> {
        let class = self.classifier.classify(request);
        self.execute(class, request).await
    }

    #[instrument(skip_all, fields(class = %class, method = %request.method(), url = %request.url()))]
    pub async fn execute(
        &self,
        class: RequestClass,
        request: &RequestMeta,
    ) -> Result<Served, StrategyError> {
        let result = match class {
            RequestClass::Navigation => {
                let key = self.settings.navigation_root.clone();
                self.network_first(class, request, key).await
            }
            RequestClass::ApiCall => self.network_first(class, request, request.key()).await,
            RequestClass::Media => self.cache_first(request).await,
            RequestClass::StyleOrScript => self.stale_while_revalidate(class, request).await,
            RequestClass::Default => self.default_with_fallback(request).await,
        };

        match &result {
            Ok(served) => {
                debug!(source = served.source.as_str(), status = %served.response.status(), "Request served");
                counter!(METRIC_REQUEST, "class" => class.as_str(), "source" => served.source.as_str())
                    .increment(1);
            }
            Err(StrategyError::CacheMiss { key }) => {
                warn!(key = %key, "Offline with no cached copy");
                counter!(METRIC_CACHE_MISS, "class" => class.as_str()).increment(1);
            }
            Err(StrategyError::NetworkUnavailable(err)) => {
                warn!(error = %err, "Network unavailable and nothing cached");
            }
        }

        result
    }

    /// Network-first: live response when the origin answers in time, else the
    /// last cached copy stored under `key`.
    pub async fn network_first(
        &self,
        class: RequestClass,
        request: &RequestMeta,
        key: RequestKey,
    ) -> Result<Served, StrategyError> {
        let fetched = match tokio::time::timeout(
            self.settings.network_timeout,
            self.fetcher.fetch(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.settings.network_timeout)),
        };

        match fetched {
            Ok(response) => {
                if self.is_writable(request, &response) {
                    self.store_in_background("network_first.store", key, response.clone());
                }
                Ok(Served::new(class, ResponseSource::Network, response))
            }
            Err(err) => {
                self.record_network_failure(class, &err);
                match self.namespaces.lookup(&key, &RUNTIME_THEN_PRECACHE).await {
                    Some((role, cached)) => Ok(Served::new(class, role.into(), cached)),
                    None => Err(StrategyError::CacheMiss { key }),
                }
            }
        }
    }

    /// Cache-first with a bounded media subset and a precached fallback image.
    pub async fn cache_first(&self, request: &RequestMeta) -> Result<Served, StrategyError> {
        let class = RequestClass::Media;
        let key = request.key();

        if let Some((role, cached)) = self.namespaces.lookup(&key, &RUNTIME_THEN_PRECACHE).await {
            return Ok(Served::new(class, role.into(), cached));
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if self.is_writable(request, &response) {
                    self.store_and_trim_in_background(key, response.clone());
                }
                Ok(Served::new(class, ResponseSource::Network, response))
            }
            Err(err) => {
                self.record_network_failure(class, &err);
                let fallback = self.settings.fallback_image.clone();
                self.fallback_on_miss(class, key, fallback.as_ref(), &[NamespaceRole::Precache])
                    .await
            }
        }
    }

    /// Stale-while-revalidate: the network fetch starts immediately and keeps
    /// running after a cached copy has been returned, refreshing the entry.
    pub async fn stale_while_revalidate(
        &self,
        class: RequestClass,
        request: &RequestMeta,
    ) -> Result<Served, StrategyError> {
        let key = request.key();
        let (sender, receiver) = oneshot::channel();
        self.spawn_revalidation(request, key.clone(), sender);

        if let Some((role, cached)) = self.namespaces.lookup(&key, &RUNTIME_THEN_PRECACHE).await {
            return Ok(Served::new(class, role.into(), cached));
        }

        match receiver.await {
            Ok(Ok(response)) => Ok(Served::new(class, ResponseSource::Network, response)),
            Ok(Err(err)) => {
                self.record_network_failure(class, &err);
                Err(StrategyError::NetworkUnavailable(err))
            }
            Err(_) => Err(StrategyError::NetworkUnavailable(FetchError::Aborted)),
        }
    }

    async fn default_with_fallback(&self, request: &RequestMeta) -> Result<Served, StrategyError> {
        let class = RequestClass::Default;
        match self.stale_while_revalidate(class, request).await {
            Err(StrategyError::NetworkUnavailable(err)) if self.settings.offline_root_fallback => {
                let root = self.settings.navigation_root.clone();
                self.fallback_on_miss(class, request.key(), Some(&root), &RUNTIME_THEN_PRECACHE)
                    .await
                    .map_err(|_| StrategyError::NetworkUnavailable(err))
            }
            other => other,
        }
    }

    /// Serve a designated substitute entry after both network and cache missed.
    async fn fallback_on_miss(
        &self,
        class: RequestClass,
        missed: RequestKey,
        fallback: Option<&RequestKey>,
        roles: &[NamespaceRole],
    ) -> Result<Served, StrategyError> {
        if let Some(fallback) = fallback {
            if let Some((_, response)) = self.namespaces.lookup(fallback, roles).await {
                debug!(missed = %missed, fallback = %fallback, "Serving fallback entry");
                return Ok(Served::new(class, ResponseSource::Fallback, response));
            }
        }
        Err(StrategyError::CacheMiss { key: missed })
    }

    fn spawn_revalidation(
        &self,
        request: &RequestMeta,
        key: RequestKey,
        sender: oneshot::Sender<Result<ResponseRecord, FetchError>>,
    ) {
        let fetcher = self.fetcher.clone();
        let store = self.namespaces.store().clone();
        let runtime = self.namespaces.namespaces().runtime().clone();
        let request = request.clone();
        let request_writable = self.is_request_writable(&request);

        self.background.spawn("revalidate", async move {
            let response = match fetcher.fetch(&request).await {
                Ok(response) => response,
                Err(err) => {
                    debug!(key = %key, error = %err, "Revalidation fetch failed");
                    // Nobody is waiting when a cached copy was already served.
                    let _ = sender.send(Err(err));
                    return Ok(());
                }
            };

            let copy = response.clone();
            let _ = sender.send(Ok(response));

            if request_writable && copy.is_storable() {
                store.put(&runtime, key, copy).await?;
            }
            Ok::<(), StoreError>(())
        });
    }

    fn store_in_background(&self, task: &'static str, key: RequestKey, response: ResponseRecord) {
        let store = self.namespaces.store().clone();
        let runtime = self.namespaces.namespaces().runtime().clone();
        self.background
            .spawn(task, async move { store.put(&runtime, key, response).await });
    }

    fn store_and_trim_in_background(&self, key: RequestKey, response: ResponseRecord) {
        let store = self.namespaces.store().clone();
        let runtime = self.namespaces.namespaces().runtime().clone();
        let media = self.media.clone();
        let max_entries = self.settings.media_max_entries;

        self.background.spawn("cache_first.store", async move {
            store.put(&runtime, key.clone(), response).await?;
            media.record(&runtime, key);
            let removed = eviction::trim(store.as_ref(), &runtime, max_entries, |key| {
                media.contains(&runtime, key)
            })
            .await?;
            media.forget(&runtime, &removed);
            Ok::<(), StoreError>(())
        });
    }

    /// Only same-origin GET requests may populate the runtime namespace.
    fn is_request_writable(&self, request: &RequestMeta) -> bool {
        *request.method() == Method::GET && request.is_same_origin(self.classifier.origin())
    }

    fn is_writable(&self, request: &RequestMeta, response: &ResponseRecord) -> bool {
        self.is_request_writable(request) && response.is_storable()
    }

    fn record_network_failure(&self, class: RequestClass, err: &FetchError) {
        warn!(class = %class, error = %err, "Network fetch failed");
        counter!(METRIC_NETWORK_FAILURE, "class" => class.as_str()).increment(1);
    }
}
