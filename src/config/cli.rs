use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the offgrid binary.
#[derive(Debug, Parser)]
#[command(
    name = "offgrid",
    version,
    about = "Offline-first caching proxy for a single origin"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "OFFGRID_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the caching proxy.
    Serve(Box<ServeArgs>),
    /// Print the class a request would be assigned.
    Classify(ClassifyArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the origin the proxy fronts.
    #[arg(long = "origin-url", value_name = "URL")]
    pub origin_url: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the precache version tag.
    #[arg(long = "cache-precache-tag", value_name = "TAG")]
    pub cache_precache_tag: Option<String>,

    /// Override the runtime cache version tag.
    #[arg(long = "cache-runtime-tag", value_name = "TAG")]
    pub cache_runtime_tag: Option<String>,

    /// Override the bound on cached media entries.
    #[arg(long = "cache-media-max-entries", value_name = "COUNT")]
    pub cache_media_max_entries: Option<usize>,

    /// Override the network-first timeout in milliseconds.
    #[arg(long = "cache-network-timeout-ms", value_name = "MS")]
    pub cache_network_timeout_ms: Option<u64>,

    /// Toggle immediate activation after install.
    #[arg(
        long = "cache-skip-waiting",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_skip_waiting: Option<bool>,

    /// Override the number of install attempts at startup.
    #[arg(long = "install-max-attempts", value_name = "COUNT")]
    pub install_max_attempts: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct ClassifyArgs {
    /// Absolute URL of the request.
    #[arg(value_name = "URL")]
    pub url: String,

    /// Request method.
    #[arg(long, default_value = "GET")]
    pub method: String,

    /// Value of the Accept header.
    #[arg(long, value_name = "VALUE")]
    pub accept: Option<String>,

    /// Request destination (document, image, style, font, script, ...).
    #[arg(long, value_name = "DEST")]
    pub destination: Option<String>,

    /// Mark the request as a top-level navigation.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub navigate: bool,
}
