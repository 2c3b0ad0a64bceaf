//! Release lifecycle: install, activate, serve.
//!
//! A [`Worker`] owns at most one *active* release (serving requests) and at
//! most one *waiting* release (installed, precache warm, not yet serving).
//! Requests arriving while an activation runs wait on a gate until the new
//! release is ready, so no request observes a half-cleaned store.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{info, instrument, warn};
use url::Url;
use uuid::Uuid;

use crate::cache::{
    ActivationReport, BackgroundTasks, CacheConfig, CacheStore, Classifier, ClassifierRules,
    Fetcher, Manifest, MediaIndex, NamespaceManager, Namespaces, Served, StoreError,
    StrategyError, StrategyExecutor, StrategySettings, WarmUpController, WarmUpError,
};
use crate::domain::request::RequestMeta;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("install failed: {0}")]
    Install(#[from] WarmUpError),
    #[error("activation failed: {0}")]
    Activation(#[from] StoreError),
    #[error("invalid release: {0}")]
    InvalidRelease(String),
    #[error("no installed release is waiting to activate")]
    NothingToActivate,
}

/// Control messages accepted from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Activate the waiting release now.
    SkipWaiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Installing,
    Installed,
    Activating,
    Activated,
}

/// A versioned set of namespaces plus the manifest that seeds its precache.
#[derive(Debug, Clone)]
pub struct Release {
    id: Uuid,
    config: CacheConfig,
    manifest: Manifest,
    created_at: OffsetDateTime,
}

impl Release {
    pub fn new(config: CacheConfig, manifest: Manifest) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            manifest,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn namespaces(&self) -> Namespaces {
        self.config.namespaces()
    }

    fn summary(&self) -> ReleaseSummary {
        ReleaseSummary {
            id: self.id,
            namespaces: self.namespaces(),
            manifest_entries: self.manifest.len(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseSummary {
    pub id: Uuid,
    pub namespaces: Namespaces,
    pub manifest_entries: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub phase: Phase,
    pub active: Option<ReleaseSummary>,
    pub waiting: Option<ReleaseSummary>,
    pub pending_background: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallOutcome {
    pub release: Uuid,
    pub precached: usize,
    /// Present when the release was activated right after install.
    pub activation: Option<ActivationReport>,
}

struct ActiveRelease {
    release: Release,
    executor: StrategyExecutor,
}

struct Lifecycle {
    phase: Phase,
    waiting: Option<Release>,
}

/// What `status()` reports about the lifecycle, published on every
/// transition so readers never wait for an install in progress.
#[derive(Clone)]
struct LifecycleView {
    phase: Phase,
    waiting: Option<ReleaseSummary>,
}

impl From<&Lifecycle> for LifecycleView {
    fn from(lifecycle: &Lifecycle) -> Self {
        Self {
            phase: lifecycle.phase,
            waiting: lifecycle.waiting.as_ref().map(Release::summary),
        }
    }
}

pub struct Worker {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    origin: Url,
    classifier: Arc<Classifier>,
    background: BackgroundTasks,
    media: MediaIndex,
    lifecycle: Mutex<Lifecycle>,
    view: watch::Sender<LifecycleView>,
    active: watch::Sender<Option<Arc<ActiveRelease>>>,
    /// Held shared by every request for the whole strategy run, exclusively
    /// by an activation before it cleans up.
    serving: RwLock<()>,
}

impl Worker {
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        origin: Url,
        rules: ClassifierRules,
    ) -> Self {
        let classifier = Arc::new(Classifier::new(&origin, rules));
        let lifecycle = Lifecycle {
            phase: Phase::Idle,
            waiting: None,
        };
        let (view, _) = watch::channel(LifecycleView::from(&lifecycle));
        let (active, _) = watch::channel(None);
        Self {
            store,
            fetcher,
            origin,
            classifier,
            background: BackgroundTasks::new(),
            media: MediaIndex::new(),
            lifecycle: Mutex::new(lifecycle),
            view,
            active,
            serving: RwLock::new(()),
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Warm the precache of `release` and stage it as waiting. With
    /// `skip_waiting` set the release is activated straight away.
    ///
    /// A failed warm-up leaves the current active release and any previously
    /// waiting release untouched.
    #[instrument(skip_all, fields(release = %release.id()))]
    pub async fn on_install(&self, release: Release) -> Result<InstallOutcome, LifecycleError> {
        StrategySettings::resolve(release.config(), &self.origin)
            .map_err(|err| LifecycleError::InvalidRelease(err.to_string()))?;

        let mut lifecycle = self.lifecycle.lock().await;
        let previous_phase = lifecycle.phase;
        self.transition(&mut lifecycle, Phase::Installing);

        let controller =
            WarmUpController::new(self.store.clone(), self.fetcher.clone(), self.origin.clone());
        let namespaces = release.namespaces();
        let precached = match controller
            .warm_up(namespaces.precache(), release.manifest())
            .await
        {
            Ok(written) => written,
            Err(err) => {
                self.transition(&mut lifecycle, previous_phase);
                warn!(error = %err, "Release install failed");
                return Err(err.into());
            }
        };

        let id = release.id();
        let skip_waiting = release.config().skip_waiting;
        if let Some(replaced) = lifecycle.waiting.replace(release) {
            info!(replaced = %replaced.id(), "Waiting release superseded");
        }
        self.transition(&mut lifecycle, Phase::Installed);
        info!(precached, skip_waiting, "Release installed");

        let activation = if skip_waiting {
            Some(self.activate_waiting(&mut lifecycle).await?)
        } else {
            None
        };

        Ok(InstallOutcome {
            release: id,
            precached,
            activation,
        })
    }

    /// Promote the waiting release and remove every namespace it does not
    /// own.
    pub async fn on_activate(&self) -> Result<ActivationReport, LifecycleError> {
        let mut lifecycle = self.lifecycle.lock().await;
        self.activate_waiting(&mut lifecycle).await
    }

    pub async fn on_message(
        &self,
        message: ControlMessage,
    ) -> Result<ActivationReport, LifecycleError> {
        match message {
            ControlMessage::SkipWaiting => self.on_activate().await,
        }
    }

    /// Serve `request` with the active release. Waits while no release is
    /// active, including during an activation.
    ///
    /// The request runs entirely under one release: an activation starting
    /// meanwhile waits for it, and for the cache writes it spawns, before
    /// removing that release's namespaces.
    pub async fn on_request(&self, request: &RequestMeta) -> Result<Served, StrategyError> {
        loop {
            let active = self.active_release().await;
            let _serving = self.serving.read().await;
            if self.is_current(&active) {
                return active.executor.handle(request).await;
            }
        }
    }

    /// Whether a release is currently serving.
    pub fn is_active(&self) -> bool {
        self.active.borrow().is_some()
    }

    /// Lifecycle snapshot. Does not wait for an install or activation in
    /// progress.
    pub async fn status(&self) -> WorkerStatus {
        let view = self.view.borrow().clone();
        let active = self
            .active
            .borrow()
            .as_ref()
            .map(|active| active.release.summary());
        WorkerStatus {
            phase: view.phase,
            active,
            waiting: view.waiting,
            pending_background: self.background.pending(),
        }
    }

    fn transition(&self, lifecycle: &mut Lifecycle, phase: Phase) {
        lifecycle.phase = phase;
        self.view.send_replace(LifecycleView::from(&*lifecycle));
    }

    fn is_current(&self, release: &Arc<ActiveRelease>) -> bool {
        self.active
            .borrow()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, release))
    }

    async fn active_release(&self) -> Arc<ActiveRelease> {
        let mut receiver = self.active.subscribe();
        loop {
            let current = receiver.borrow_and_update().clone();
            if let Some(active) = current {
                return active;
            }
            // The sender lives in `self`, so the channel cannot close here.
            let _ = receiver.changed().await;
        }
    }

    #[instrument(skip_all)]
    async fn activate_waiting(
        &self,
        lifecycle: &mut Lifecycle,
    ) -> Result<ActivationReport, LifecycleError> {
        let release = lifecycle
            .waiting
            .take()
            .ok_or(LifecycleError::NothingToActivate)?;
        let settings = match StrategySettings::resolve(release.config(), &self.origin) {
            Ok(settings) => settings,
            Err(err) => {
                lifecycle.waiting = Some(release);
                return Err(LifecycleError::InvalidRelease(err.to_string()));
            }
        };

        let previous_phase = lifecycle.phase;
        self.transition(lifecycle, Phase::Activating);
        let previous = self.active.send_replace(None);
        // Requests still running under the outgoing release finish first,
        // then the writes they spawned land, then its namespaces go.
        drop(self.serving.write().await);
        self.background.wait_idle().await;

        let namespaces = release.namespaces();
        let manager = NamespaceManager::new(self.store.clone(), namespaces.clone());
        let report = match manager.activate().await {
            Ok(report) => report,
            Err(err) => {
                self.active.send_replace(previous);
                lifecycle.waiting = Some(release);
                self.transition(lifecycle, previous_phase);
                warn!(error = %err, "Activation aborted, previous release restored");
                return Err(err.into());
            }
        };
        self.media
            .retain_namespaces(|namespace| namespaces.contains(namespace));

        info!(
            release = %release.id(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Release activated"
        );
        let executor = StrategyExecutor::new(
            manager,
            self.fetcher.clone(),
            self.classifier.clone(),
            settings,
            self.background.clone(),
        )
        .with_media_index(self.media.clone());
        self.active
            .send_replace(Some(Arc::new(ActiveRelease { release, executor })));
        self.transition(lifecycle, Phase::Activated);

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::cache::{FetchError, MemoryStore, NamespaceId};
    use crate::domain::response::ResponseRecord;

    #[derive(Default)]
    struct StaticFetcher {
        bodies: HashMap<String, &'static str>,
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, request: &RequestMeta) -> Result<ResponseRecord, FetchError> {
            let body = self
                .bodies
                .get(request.url().as_str())
                .copied()
                .unwrap_or("live");
            Ok(ResponseRecord::ok("text/html", body))
        }
    }

    fn origin() -> Url {
        Url::parse("https://app.example/").unwrap()
    }

    fn worker(store: Arc<MemoryStore>) -> Worker {
        Worker::new(
            store,
            Arc::new(StaticFetcher::default()),
            origin(),
            ClassifierRules::default(),
        )
    }

    fn release(precache: &str, runtime: &str, skip_waiting: bool) -> Release {
        let config = CacheConfig {
            skip_waiting,
            ..CacheConfig::default()
        }
        .with_tags(precache, runtime);
        Release::new(config, Manifest::new(["/", "/app.css"]))
    }

    #[tokio::test]
    async fn install_with_skip_waiting_activates_immediately() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(store.clone());

        let outcome = worker.on_install(release("v1", "v1", true)).await.unwrap();

        assert_eq!(outcome.precached, 2);
        assert!(outcome.activation.is_some());
        assert!(worker.is_active());
        assert_eq!(worker.status().await.phase, Phase::Activated);
        assert_eq!(
            store.len(&NamespaceId::from_raw("offgrid-precache-v1")),
            2
        );
    }

    #[tokio::test]
    async fn waiting_release_activates_on_skip_waiting_message() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(store.clone());
        worker.on_install(release("v1", "v1", true)).await.unwrap();

        let outcome = worker.on_install(release("v2", "v1", false)).await.unwrap();
        assert!(outcome.activation.is_none());
        let status = worker.status().await;
        assert_eq!(status.phase, Phase::Installed);
        assert!(status.waiting.is_some());

        let report = worker.on_message(ControlMessage::SkipWaiting).await.unwrap();
        assert_eq!(
            report.removed,
            vec![NamespaceId::from_raw("offgrid-precache-v1")]
        );
        let namespaces = store.namespaces().await.unwrap();
        assert_eq!(
            namespaces,
            vec![NamespaceId::from_raw("offgrid-precache-v2")]
        );
    }

    #[tokio::test]
    async fn activating_without_a_waiting_release_fails() {
        let worker = worker(Arc::new(MemoryStore::new()));
        let err = worker.on_activate().await.unwrap_err();
        assert!(matches!(err, LifecycleError::NothingToActivate));
    }

    #[tokio::test]
    async fn requests_wait_for_activation() {
        let store = Arc::new(MemoryStore::new());
        let worker = Arc::new(worker(store));
        let request = RequestMeta::get("https://app.example/app.css").unwrap();

        let pending = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.on_request(&request).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        worker.on_install(release("v1", "v1", true)).await.unwrap();
        let served = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(served.response.body().as_ref(), b"live");
    }

    #[tokio::test]
    async fn invalid_navigation_root_is_rejected_before_warm_up() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker(store.clone());
        let config = CacheConfig {
            navigation_root: "http://[::1".to_string(),
            ..CacheConfig::default()
        };

        let err = worker
            .on_install(Release::new(config, Manifest::new(["/"])))
            .await
            .unwrap_err();

        assert!(matches!(err, LifecycleError::InvalidRelease(_)));
        assert!(store.namespaces().await.unwrap().is_empty());
    }
}
