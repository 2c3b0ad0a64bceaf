//! Buffered response payloads.

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use bytes::Bytes;
use time::OffsetDateTime;

/// A fully received response.
///
/// The transport reads a network body exactly once, at the point of receipt,
/// into `body`. Cloning a record afterwards shares the underlying buffer, so the
/// copy handed to the caller and the copy written to cache are independent
/// consumers of the same payload.
#[derive(Debug, Clone)]
pub struct ResponseRecord {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    received_at: OffsetDateTime,
}

impl ResponseRecord {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            received_at: OffsetDateTime::now_utc(),
        }
    }

    /// A 200 response with the given content type and body.
    pub fn ok(content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self::new(StatusCode::OK, headers, body.into())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn received_at(&self) -> OffsetDateTime {
        self.received_at
    }

    /// Whether this response may be persisted in a cache namespace.
    ///
    /// Only successful responses are kept. Responses that set cookies or open
    /// an event stream are returned live but never stored.
    pub fn is_storable(&self) -> bool {
        if !self.status.is_success() {
            return false;
        }

        if self.headers.contains_key(header::SET_COOKIE) {
            return false;
        }

        !self
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("text/event-stream"))
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}
