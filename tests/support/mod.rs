#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use offgrid::cache::{
    BackgroundTasks, CacheConfig, CacheStore, Classifier, ClassifierRules, FetchError, Fetcher,
    MemoryStore, NamespaceManager, StrategyExecutor, StrategySettings,
};
use offgrid::domain::request::RequestMeta;
use offgrid::domain::response::ResponseRecord;
use url::Url;

pub const ORIGIN: &str = "https://app.example/";

pub fn origin() -> Url {
    Url::parse(ORIGIN).expect("origin should parse")
}

pub fn url(path: &str) -> String {
    origin().join(path).expect("path should join").to_string()
}

#[derive(Clone)]
enum Script {
    Respond(ResponseRecord),
    Fail,
}

/// Fake network capability answering from a script keyed by absolute URL.
///
/// Unscripted URLs answer `200 text/plain` with the path as body.
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path: &str, content_type: &'static str, body: &'static str) {
        self.respond_with(path, ResponseRecord::ok(content_type, body));
    }

    pub fn respond_status(&self, path: &str, status: StatusCode) {
        self.respond_with(
            path,
            ResponseRecord::new(status, HeaderMap::new(), Bytes::new()),
        );
    }

    pub fn respond_with(&self, path: &str, response: ResponseRecord) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url(path), Script::Respond(response));
    }

    pub fn fail(&self, path: &str) {
        self.scripts.lock().unwrap().insert(url(path), Script::Fail);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Delay only the fetches of `path`.
    pub fn delay_for(&self, path: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(url(path), delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, path: &str) -> usize {
        let target = url(path);
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|called| **called == target)
            .count()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &RequestMeta) -> Result<ResponseRecord, FetchError> {
        let target = request.url().to_string();
        self.calls.lock().unwrap().push(target.clone());

        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(&target)
            .copied()
            .or(*self.delay.lock().unwrap());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::transport("network is offline"));
        }

        let script = self.scripts.lock().unwrap().get(&target).cloned();
        match script {
            Some(Script::Respond(response)) => Ok(response),
            Some(Script::Fail) => Err(FetchError::transport(format!("scripted failure for {target}"))),
            None => Ok(ResponseRecord::ok(
                "text/plain",
                request.url().path().to_string(),
            )),
        }
    }
}

/// Strategy executor over a fresh in-memory store.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub background: BackgroundTasks,
    pub config: CacheConfig,
    pub executor: StrategyExecutor,
}

impl Harness {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()), ScriptedFetcher::new())
    }

    pub fn with_store(
        config: CacheConfig,
        store: Arc<MemoryStore>,
        fetcher: Arc<ScriptedFetcher>,
    ) -> Self {
        let background = BackgroundTasks::new();
        let settings = StrategySettings::resolve(&config, &origin()).expect("settings resolve");
        let dyn_store: Arc<dyn CacheStore> = store.clone();
        let dyn_fetcher: Arc<dyn Fetcher> = fetcher.clone();
        let executor = StrategyExecutor::new(
            NamespaceManager::new(dyn_store, config.namespaces()),
            dyn_fetcher,
            Arc::new(Classifier::new(&origin(), ClassifierRules::default())),
            settings,
            background.clone(),
        );
        Self {
            store,
            fetcher,
            background,
            config,
            executor,
        }
    }

    pub async fn settle(&self) {
        self.background.wait_idle().await;
    }

    pub async fn runtime_urls(&self) -> Vec<String> {
        self.store
            .keys(self.config.namespaces().runtime())
            .await
            .expect("keys")
            .into_iter()
            .map(|key| key.url().to_string())
            .collect()
    }
}

pub fn get(path: &str) -> RequestMeta {
    RequestMeta::get(&url(path)).expect("request url should parse")
}
