//! Namespace identity and generational cleanup.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::domain::request::RequestKey;
use crate::domain::response::ResponseRecord;

use super::store::{CacheStore, StoreError};

const METRIC_NAMESPACE_REMOVED: &str = "offgrid_namespace_removed_total";

/// Logical role of a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceRole {
    /// Populated at install time from the manifest, immutable per release.
    Precache,
    /// Populated while serving live requests.
    Runtime,
}

impl NamespaceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Precache => "precache",
            Self::Runtime => "runtime",
        }
    }
}

/// Identifier of a namespace, `<prefix>-<role>-<tag>` for namespaces this
/// engine creates. Identifiers found in a store may be arbitrary strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NamespaceId(String);

impl NamespaceId {
    pub fn new(prefix: &str, role: NamespaceRole, tag: &str) -> Self {
        Self(format!("{prefix}-{}-{tag}", role.as_str()))
    }

    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The pair of namespaces a release expects to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespaces {
    precache: NamespaceId,
    runtime: NamespaceId,
}

impl Namespaces {
    pub fn new(prefix: &str, precache_tag: &str, runtime_tag: &str) -> Self {
        Self {
            precache: NamespaceId::new(prefix, NamespaceRole::Precache, precache_tag),
            runtime: NamespaceId::new(prefix, NamespaceRole::Runtime, runtime_tag),
        }
    }

    pub fn precache(&self) -> &NamespaceId {
        &self.precache
    }

    pub fn runtime(&self) -> &NamespaceId {
        &self.runtime
    }

    pub fn get(&self, role: NamespaceRole) -> &NamespaceId {
        match role {
            NamespaceRole::Precache => &self.precache,
            NamespaceRole::Runtime => &self.runtime,
        }
    }

    pub fn contains(&self, id: &NamespaceId) -> bool {
        id == &self.precache || id == &self.runtime
    }
}

/// Outcome of an activation cleanup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    pub removed: Vec<NamespaceId>,
    pub failed: Vec<(NamespaceId, String)>,
}

/// Owns namespace identity for one release and the transitions between
/// releases.
#[derive(Clone)]
pub struct NamespaceManager {
    store: Arc<dyn CacheStore>,
    namespaces: Namespaces,
}

impl NamespaceManager {
    pub fn new(store: Arc<dyn CacheStore>, namespaces: Namespaces) -> Self {
        Self { store, namespaces }
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Destroy every namespace that does not belong to this release.
    ///
    /// Stale namespaces are removed concurrently. A failure to remove one of
    /// them is recorded in the report and does not stop the others; only a
    /// failure to enumerate namespaces aborts activation.
    #[instrument(skip(self), fields(precache = %self.namespaces.precache, runtime = %self.namespaces.runtime))]
    pub async fn activate(&self) -> Result<ActivationReport, StoreError> {
        let existing = self.store.namespaces().await?;
        let stale: Vec<NamespaceId> = existing
            .into_iter()
            .filter(|id| !self.namespaces.contains(id))
            .collect();

        let results = join_all(stale.iter().map(|id| self.store.delete_namespace(id))).await;

        let mut report = ActivationReport::default();
        for (id, result) in stale.into_iter().zip(results) {
            match result {
                Ok(_) => {
                    info!(namespace = %id, "Removed stale cache namespace");
                    counter!(METRIC_NAMESPACE_REMOVED).increment(1);
                    report.removed.push(id);
                }
                Err(err) => {
                    warn!(namespace = %id, error = %err, "Failed to remove stale cache namespace");
                    report.failed.push((id, err.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Look up `key` in the given namespaces, in order.
    ///
    /// Store failures are logged and treated as a miss for that namespace.
    pub async fn lookup(
        &self,
        key: &RequestKey,
        roles: &[NamespaceRole],
    ) -> Option<(NamespaceRole, ResponseRecord)> {
        for role in roles {
            let namespace = self.namespaces.get(*role);
            match self.store.get(namespace, key).await {
                Ok(Some(response)) => return Some((*role, response)),
                Ok(None) => {}
                Err(err) => {
                    warn!(namespace = %namespace, key = %key, error = %err, "Cache read failed");
                }
            }
        }
        debug!(key = %key, "No cached copy");
        None
    }
}
