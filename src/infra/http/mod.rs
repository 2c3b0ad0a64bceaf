mod control;
mod middleware;
mod proxy;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::application::worker::Worker;
use crate::cache::{CacheConfig, Manifest};

pub use control::StageReleaseRequest;
pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use proxy::request_meta;

/// Response header naming where a proxied response came from.
pub const SOURCE_HEADER: &str = "x-offgrid-source";

/// Settings applied to releases staged over HTTP, apart from their tags.
#[derive(Clone)]
pub struct ReleaseDefaults {
    pub config: CacheConfig,
    pub manifest: Manifest,
}

#[derive(Clone)]
pub struct RouterState {
    pub worker: Arc<Worker>,
    pub release_defaults: ReleaseDefaults,
}

pub fn build_router(state: RouterState) -> Router {
    Router::new()
        .route("/__offgrid/status", get(control::status))
        .route("/__offgrid/skip-waiting", post(control::skip_waiting))
        .route("/__offgrid/releases", post(control::stage_release))
        .fallback(proxy::proxy)
        .layer(axum::middleware::from_fn(middleware::log_responses))
        .layer(axum::middleware::from_fn(middleware::set_request_context))
        .with_state(state)
}
