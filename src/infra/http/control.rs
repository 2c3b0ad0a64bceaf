//! Out-of-band lifecycle routes under `/__offgrid`.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::application::error::HttpError;
use crate::application::worker::{ControlMessage, Release};
use crate::cache::Manifest;

use super::RouterState;

/// Body of `POST /__offgrid/releases`.
#[derive(Debug, Deserialize)]
pub struct StageReleaseRequest {
    pub precache_tag: String,
    pub runtime_tag: String,
    /// Defaults to the configured manifest.
    #[serde(default)]
    pub manifest: Option<Manifest>,
    /// Activate straight after install instead of waiting for `skip-waiting`.
    #[serde(default)]
    pub skip_waiting: bool,
}

pub async fn status(State(state): State<RouterState>) -> Response {
    Json(state.worker.status().await).into_response()
}

pub async fn skip_waiting(State(state): State<RouterState>) -> Result<Response, HttpError> {
    let report = state
        .worker
        .on_message(ControlMessage::SkipWaiting)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(report)).into_response())
}

pub async fn stage_release(
    State(state): State<RouterState>,
    Json(request): Json<StageReleaseRequest>,
) -> Result<Response, HttpError> {
    let precache_tag = request.precache_tag.trim();
    let runtime_tag = request.runtime_tag.trim();
    if precache_tag.is_empty() || runtime_tag.is_empty() {
        return Err(HttpError::new(
            "infra::http::control::stage_release",
            StatusCode::BAD_REQUEST,
            "Release could not be processed",
            "precache_tag and runtime_tag must not be empty",
        ));
    }

    let mut config = state.release_defaults.config.with_tags(precache_tag, runtime_tag);
    config.skip_waiting = request.skip_waiting;
    let manifest = request
        .manifest
        .unwrap_or_else(|| state.release_defaults.manifest.clone());

    let outcome = state.worker.on_install(Release::new(config, manifest)).await?;
    let status = if outcome.activation.is_some() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(outcome)).into_response())
}
