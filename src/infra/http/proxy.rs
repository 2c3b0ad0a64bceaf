use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use http_body_util::{BodyExt, Limited};
use url::Url;

use crate::application::error::HttpError;
use crate::cache::Served;
use crate::domain::error::DomainError;
use crate::domain::request::RequestMeta;
use crate::domain::types::Destination;

use super::{RouterState, SOURCE_HEADER};

const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;
const SEC_FETCH_MODE: &str = "sec-fetch-mode";
const SEC_FETCH_DEST: &str = "sec-fetch-dest";

/// Catch-all handler: every request that is not a control route goes through
/// the active release's strategies.
pub async fn proxy(State(state): State<RouterState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let body = match Limited::new(body, MAX_REQUEST_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            return HttpError::new(
                "infra::http::proxy",
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body rejected",
                err.to_string(),
            )
            .into_response();
        }
    };

    let meta = match request_meta(&parts, state.worker.origin()) {
        Ok(meta) => meta.with_body(body),
        Err(err) => {
            return HttpError::from_error(
                "infra::http::proxy",
                StatusCode::BAD_REQUEST,
                "Malformed request target",
                &err,
            )
            .into_response();
        }
    };

    match state.worker.on_request(&meta).await {
        Ok(served) => served_response(served),
        Err(err) => HttpError::from(err).into_response(),
    }
}

/// Build the engine's view of an incoming request. Absolute-form targets
/// keep their own origin; origin-form paths are resolved against `origin`.
pub fn request_meta(parts: &Parts, origin: &Url) -> Result<RequestMeta, DomainError> {
    let target = parts.uri.to_string();
    let url = if parts.uri.scheme().is_some() {
        Url::parse(&target)
    } else {
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|value| value.as_str())
            .unwrap_or("/");
        origin.join(path_and_query)
    }
    .map_err(|err| DomainError::invalid_url(target.clone(), err))?;

    let mut meta =
        RequestMeta::new(parts.method.clone(), url).with_headers(parts.headers.clone());

    if header_str(parts, SEC_FETCH_MODE).is_some_and(|mode| mode.eq_ignore_ascii_case("navigate"))
    {
        meta = meta.navigation();
    }
    if let Some(dest) = header_str(parts, SEC_FETCH_DEST) {
        let Ok(destination) = dest.parse::<Destination>();
        meta = meta.with_destination(destination);
    }

    Ok(meta)
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn served_response(served: Served) -> Response {
    let source = served.source;
    let (status, headers, body) = served.response.into_parts();

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
        .headers_mut()
        .insert(SOURCE_HEADER, HeaderValue::from_static(source.as_str()));
    response
}
