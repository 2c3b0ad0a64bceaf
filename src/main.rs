use std::{process, sync::Arc};

use axum::http::Method;
use offgrid::{
    application::error::AppError,
    application::worker::{Release, Worker},
    cache::{CacheStore, Classifier, Fetcher, MemoryStore},
    config,
    domain::{error::DomainError, request::RequestMeta, types::Destination},
    infra::{
        error::InfraError,
        fetch::HttpFetcher,
        http::{self, ReleaseDefaults, RouterState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Classify(args) => run_classify(&settings, &args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new().map_err(AppError::from)?);
    let worker = Arc::new(Worker::new(
        store,
        fetcher,
        settings.origin.url.clone(),
        settings.classifier.rules.clone(),
    ));

    let release_defaults = ReleaseDefaults {
        config: settings.cache_config(),
        manifest: settings.manifest.manifest(),
    };
    install_initial_release(&worker, &settings, &release_defaults).await?;

    let router = http::build_router(RouterState {
        worker: worker.clone(),
        release_defaults,
    });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, origin = %settings.origin.url, "Proxy listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    let background = worker.background();
    if tokio::time::timeout(settings.server.graceful_shutdown, background.wait_idle())
        .await
        .is_err()
    {
        warn!(
            pending = background.pending(),
            "Shutdown timeout elapsed with background cache writes outstanding"
        );
    }

    Ok(())
}

/// Install (and activate) the configured release, retrying while the origin
/// is unreachable.
async fn install_initial_release(
    worker: &Worker,
    settings: &config::Settings,
    defaults: &ReleaseDefaults,
) -> Result<(), AppError> {
    let max_attempts = settings.install.max_attempts.get();
    let mut attempt = 1;
    loop {
        let release = Release::new(defaults.config.clone(), defaults.manifest.clone());
        match worker.on_install(release).await {
            Ok(outcome) => {
                if outcome.activation.is_none() {
                    // Nothing is serving yet, so there is nobody to wait for.
                    worker.on_activate().await?;
                }
                return Ok(());
            }
            Err(err) if attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %err, "Install failed, retrying");
                attempt += 1;
                tokio::time::sleep(settings.install.retry_delay).await;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn run_classify(settings: &config::Settings, args: &config::ClassifyArgs) -> Result<(), AppError> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| DomainError::InvalidMethod(args.method.clone()))?;

    let mut request = RequestMeta::get(&args.url)?.with_method(method);
    if let Some(accept) = args.accept.as_deref() {
        request = request.with_accept(accept);
    }
    if let Some(destination) = args.destination.as_deref() {
        let Ok(destination) = destination.parse::<Destination>();
        request = request.with_destination(destination);
    }
    if args.navigate {
        request = request.navigation();
    }

    let classifier = Classifier::new(&settings.origin.url, settings.classifier.rules.clone());
    println!("{}", classifier.classify(&request));
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
