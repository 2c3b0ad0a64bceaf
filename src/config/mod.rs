//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{CacheConfig, ClassifierRules, Manifest};

mod cli;

pub use cli::{ClassifyArgs, CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "offgrid";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 10;
const DEFAULT_INSTALL_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INSTALL_RETRY_DELAY_MS: u64 = 1000;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub origin: OriginSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub manifest: ManifestSettings,
    pub classifier: ClassifierSettings,
    pub install: InstallSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct OriginSettings {
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub namespace_prefix: String,
    pub precache_tag: String,
    pub runtime_tag: String,
    pub media_max_entries: NonZeroUsize,
    pub network_timeout_ms: NonZeroU64,
    pub navigation_root: String,
    pub fallback_image: Option<String>,
    pub offline_root_fallback: bool,
    pub skip_waiting: bool,
}

impl CacheSettings {
    pub fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms.get())
    }
}

#[derive(Debug, Clone)]
pub struct ManifestSettings {
    pub urls: Vec<String>,
}

impl ManifestSettings {
    pub fn manifest(&self) -> Manifest {
        Manifest::new(self.urls.iter().cloned())
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub rules: ClassifierRules,
}

#[derive(Debug, Clone)]
pub struct InstallSettings {
    pub max_attempts: NonZeroU32,
    pub retry_delay: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("OFFGRID")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("manifest.urls")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Classify(_)) | None => {}
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            origin,
            logging,
            cache,
            manifest,
            classifier,
            install,
        } = raw;

        let server = build_server_settings(server)?;
        let origin = build_origin_settings(origin)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let manifest = build_manifest_settings(manifest)?;
        let classifier = build_classifier_settings(classifier)?;
        let install = build_install_settings(install)?;

        Ok(Self {
            server,
            origin,
            logging,
            cache,
            manifest,
            classifier,
            install,
        })
    }

    /// Cache configuration of the release described by these settings.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::from(&self.cache)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    origin: RawOriginSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    manifest: RawManifestSettings,
    classifier: RawClassifierSettings,
    install: RawInstallSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(url) = overrides.origin_url.as_ref() {
            self.origin.url = Some(url.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(tag) = overrides.cache_precache_tag.as_ref() {
            self.cache.precache_tag = Some(tag.clone());
        }
        if let Some(tag) = overrides.cache_runtime_tag.as_ref() {
            self.cache.runtime_tag = Some(tag.clone());
        }
        if let Some(max) = overrides.cache_media_max_entries {
            self.cache.media_max_entries = Some(max);
        }
        if let Some(ms) = overrides.cache_network_timeout_ms {
            self.cache.network_timeout_ms = Some(ms);
        }
        if let Some(skip) = overrides.cache_skip_waiting {
            self.cache.skip_waiting = Some(skip);
        }
        if let Some(attempts) = overrides.install_max_attempts {
            self.install.max_attempts = Some(attempts);
        }
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_origin_settings(origin: RawOriginSettings) -> Result<OriginSettings, LoadError> {
    let raw = origin
        .url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| LoadError::invalid("origin.url", "an origin url is required"))?;

    let url = Url::parse(&raw)
        .map_err(|err| LoadError::invalid("origin.url", format!("failed to parse: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
        return Err(LoadError::invalid(
            "origin.url",
            "must be an absolute http or https url",
        ));
    }

    Ok(OriginSettings { url })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();

    let namespace_prefix = non_empty(
        cache.namespace_prefix,
        defaults.namespace_prefix,
        "cache.namespace_prefix",
    )?;
    let precache_tag = non_empty(cache.precache_tag, defaults.precache_tag, "cache.precache_tag")?;
    let runtime_tag = non_empty(cache.runtime_tag, defaults.runtime_tag, "cache.runtime_tag")?;

    let media_max_entries = NonZeroUsize::new(
        cache
            .media_max_entries
            .unwrap_or(defaults.media_max_entries),
    )
    .ok_or_else(|| LoadError::invalid("cache.media_max_entries", "must be greater than zero"))?;

    let network_timeout_ms = NonZeroU64::new(
        cache
            .network_timeout_ms
            .unwrap_or(defaults.network_timeout_ms),
    )
    .ok_or_else(|| LoadError::invalid("cache.network_timeout_ms", "must be greater than zero"))?;

    let navigation_root = non_empty(
        cache.navigation_root,
        defaults.navigation_root,
        "cache.navigation_root",
    )?;
    let fallback_image = cache.fallback_image.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    Ok(CacheSettings {
        namespace_prefix,
        precache_tag,
        runtime_tag,
        media_max_entries,
        network_timeout_ms,
        navigation_root,
        fallback_image,
        offline_root_fallback: cache
            .offline_root_fallback
            .unwrap_or(defaults.offline_root_fallback),
        skip_waiting: cache.skip_waiting.unwrap_or(defaults.skip_waiting),
    })
}

fn build_manifest_settings(manifest: RawManifestSettings) -> Result<ManifestSettings, LoadError> {
    let urls = manifest.urls.unwrap_or_else(|| vec!["/".to_string()]);
    if urls.iter().any(|url| url.trim().is_empty()) {
        return Err(LoadError::invalid(
            "manifest.urls",
            "entries must not be empty",
        ));
    }
    Ok(ManifestSettings { urls })
}

fn build_classifier_settings(
    classifier: RawClassifierSettings,
) -> Result<ClassifierSettings, LoadError> {
    let defaults = ClassifierRules::default();

    let api_prefix = non_empty(
        classifier.api_prefix,
        defaults.api_prefix,
        "classifier.api_prefix",
    )?;
    if !api_prefix.starts_with('/') {
        return Err(LoadError::invalid(
            "classifier.api_prefix",
            "must start with `/`",
        ));
    }

    let image_extensions = normalize_extensions(
        classifier.image_extensions,
        defaults.image_extensions,
        "classifier.image_extensions",
    )?;
    let style_extensions = normalize_extensions(
        classifier.style_extensions,
        defaults.style_extensions,
        "classifier.style_extensions",
    )?;

    Ok(ClassifierSettings {
        rules: ClassifierRules {
            api_prefix,
            image_extensions,
            style_extensions,
            cross_origin_api: classifier
                .cross_origin_api
                .unwrap_or(defaults.cross_origin_api),
        },
    })
}

fn build_install_settings(install: RawInstallSettings) -> Result<InstallSettings, LoadError> {
    let attempts = install
        .max_attempts
        .unwrap_or(DEFAULT_INSTALL_MAX_ATTEMPTS);
    let max_attempts = non_zero_u32(attempts.into(), "install.max_attempts")?;
    let retry_delay = Duration::from_millis(
        install
            .retry_delay_ms
            .unwrap_or(DEFAULT_INSTALL_RETRY_DELAY_MS),
    );

    Ok(InstallSettings {
        max_attempts,
        retry_delay,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    namespace_prefix: Option<String>,
    precache_tag: Option<String>,
    runtime_tag: Option<String>,
    media_max_entries: Option<usize>,
    network_timeout_ms: Option<u64>,
    navigation_root: Option<String>,
    fallback_image: Option<String>,
    offline_root_fallback: Option<bool>,
    skip_waiting: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawManifestSettings {
    urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawClassifierSettings {
    api_prefix: Option<String>,
    image_extensions: Option<Vec<String>>,
    style_extensions: Option<Vec<String>>,
    cross_origin_api: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawInstallSettings {
    max_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_empty(
    value: Option<String>,
    default: String,
    key: &'static str,
) -> Result<String, LoadError> {
    match value {
        None => Ok(default),
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(LoadError::invalid(key, "must not be empty"))
            } else {
                Ok(trimmed.to_string())
            }
        }
    }
}

/// Lowercase extensions and strip a leading dot.
fn normalize_extensions(
    value: Option<Vec<String>>,
    default: Vec<String>,
    key: &'static str,
) -> Result<Vec<String>, LoadError> {
    let Some(values) = value else {
        return Ok(default);
    };
    values
        .into_iter()
        .map(|ext| {
            let normalized = ext.trim().trim_start_matches('.').to_ascii_lowercase();
            if normalized.is_empty() {
                Err(LoadError::invalid(key, "extensions must not be empty"))
            } else {
                Ok(normalized)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests;
