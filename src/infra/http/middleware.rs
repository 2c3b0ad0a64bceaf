use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{Level, debug, event};
use uuid::Uuid;

use crate::application::error::ErrorReport;

use super::SOURCE_HEADER;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id for one proxied exchange, reused from the client when it
/// sends a usable `x-request-id`.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(RequestContext { request_id });
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();

    // Served by a strategy: origin error statuses are relayed, not raised here.
    if let Some(source) = response.headers().get(SOURCE_HEADER) {
        debug!(
            target = "offgrid::http::response",
            status = status.as_u16(),
            method = %method,
            path = %path,
            source = source.to_str().unwrap_or(""),
            elapsed_ms,
            request_id,
            "request served",
        );
        return response;
    }

    if !(status.is_client_error() || status.is_server_error()) {
        return response;
    }

    let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("unknown", Vec::new()),
    };
    let detail = messages
        .first()
        .cloned()
        .unwrap_or_else(|| "no diagnostic available".to_string());

    macro_rules! report {
        ($level:expr, $message:literal) => {
            event!(
                target: "offgrid::http::response",
                $level,
                status = status.as_u16(),
                method = %method,
                path = %path,
                elapsed_ms,
                source,
                detail = %detail,
                chain = ?messages,
                request_id,
                $message,
            )
        };
    }

    if is_offline_miss(status) {
        report!(Level::INFO, "offline request missed the cache");
    } else if status.is_server_error() {
        report!(Level::ERROR, "request failed");
    } else {
        report!(Level::WARN, "client request error");
    }

    response
}

fn is_offline_miss(status: StatusCode) -> bool {
    status == StatusCode::GATEWAY_TIMEOUT
}
