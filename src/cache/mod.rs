//! Offgrid strategy engine.
//!
//! - **Classifier**: maps each request to a [`RequestClass`](crate::domain::types::RequestClass)
//! - **Strategies**: network-first, cache-first, stale-while-revalidate, fallback-on-miss
//! - **Namespaces**: a versioned precache and a runtime cache, cleaned up on activation
//! - **Eviction**: oldest-first trimming of the runtime media subset
//! - **Warm-up**: fills the precache from a manifest at install time
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! precache_tag = "v2"
//! runtime_tag = "v1"
//! media_max_entries = 60
//! network_timeout_ms = 4000
//! # ... see config.rs for all options
//! ```

mod background;
mod classify;
mod config;
pub mod eviction;
mod lock;
mod namespace;
mod network;
mod store;
mod strategy;
mod warmup;

pub use background::BackgroundTasks;
pub use classify::{Classifier, ClassifierRules};
pub use config::CacheConfig;
pub use eviction::MediaIndex;
pub use namespace::{ActivationReport, NamespaceId, NamespaceManager, NamespaceRole, Namespaces};
pub use network::{FetchError, Fetcher};
pub use store::{CacheStore, MemoryStore, StoreError};
pub use strategy::{Served, StrategyError, StrategyExecutor, StrategySettings};
pub use warmup::{Manifest, WarmUpController, WarmUpError};
