//! Cache configuration.
//!
//! Controls namespace versioning, strategy timeouts and eviction bounds via
//! `offgrid.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use super::namespace::Namespaces;

const DEFAULT_NAMESPACE_PREFIX: &str = "offgrid";
const DEFAULT_TAG: &str = "v1";
const DEFAULT_MEDIA_MAX_ENTRIES: usize = 60;
const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 4000;
const DEFAULT_NAVIGATION_ROOT: &str = "/";

/// Cache configuration from `offgrid.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Prefix shared by every namespace this engine creates.
    pub namespace_prefix: String,
    /// Version tag of the precache namespace.
    pub precache_tag: String,
    /// Version tag of the runtime namespace.
    pub runtime_tag: String,
    /// Maximum media entries kept in the runtime namespace.
    pub media_max_entries: usize,
    /// Timeout (ms) for network-first fetches.
    pub network_timeout_ms: u64,
    /// Path of the navigation root, the offline fallback for navigations.
    pub navigation_root: String,
    /// Precached image served when a media fetch fails.
    pub fallback_image: Option<String>,
    /// Serve the navigation root when a default-class request fails offline.
    pub offline_root_fallback: bool,
    /// Activate a release as soon as it is installed.
    pub skip_waiting: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: DEFAULT_NAMESPACE_PREFIX.to_string(),
            precache_tag: DEFAULT_TAG.to_string(),
            runtime_tag: DEFAULT_TAG.to_string(),
            media_max_entries: DEFAULT_MEDIA_MAX_ENTRIES,
            network_timeout_ms: DEFAULT_NETWORK_TIMEOUT_MS,
            navigation_root: DEFAULT_NAVIGATION_ROOT.to_string(),
            fallback_image: None,
            offline_root_fallback: false,
            skip_waiting: true,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            namespace_prefix: settings.namespace_prefix.clone(),
            precache_tag: settings.precache_tag.clone(),
            runtime_tag: settings.runtime_tag.clone(),
            media_max_entries: settings.media_max_entries.get(),
            network_timeout_ms: settings.network_timeout_ms.get(),
            navigation_root: settings.navigation_root.clone(),
            fallback_image: settings.fallback_image.clone(),
            offline_root_fallback: settings.offline_root_fallback,
            skip_waiting: settings.skip_waiting,
        }
    }
}

impl CacheConfig {
    /// Namespaces of the release described by this configuration.
    pub fn namespaces(&self) -> Namespaces {
        Namespaces::new(&self.namespace_prefix, &self.precache_tag, &self.runtime_tag)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }

    /// Returns the media bound as NonZeroUsize, clamping to 1 if zero.
    pub fn media_max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.media_max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Same configuration with different version tags.
    pub fn with_tags(&self, precache_tag: &str, runtime_tag: &str) -> Self {
        Self {
            precache_tag: precache_tag.to_string(),
            runtime_tag: runtime_tag.to_string(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.namespace_prefix, "offgrid");
        assert_eq!(config.media_max_entries, 60);
        assert_eq!(config.network_timeout(), Duration::from_secs(4));
        assert_eq!(config.navigation_root, "/");
        assert!(config.fallback_image.is_none());
        assert!(!config.offline_root_fallback);
        assert!(config.skip_waiting);
    }

    #[test]
    fn namespaces_follow_tags() {
        let config = CacheConfig::default().with_tags("v3", "v2");
        let namespaces = config.namespaces();
        assert_eq!(namespaces.precache().as_str(), "offgrid-precache-v3");
        assert_eq!(namespaces.runtime().as_str(), "offgrid-runtime-v2");
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            media_max_entries: 0,
            ..Default::default()
        };
        assert_eq!(config.media_max_entries_non_zero().get(), 1);
    }
}
