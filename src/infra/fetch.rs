//! reqwest-backed network capability.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, header};
use reqwest::Client;
use tracing::debug;

use crate::cache::{FetchError, Fetcher};
use crate::domain::request::RequestMeta;
use crate::domain::response::ResponseRecord;

use super::error::InfraError;

const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, InfraError> {
        Self::with_timeout(DEFAULT_TRANSPORT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn user_agent() -> &'static str {
        concat!("offgrid/", env!("CARGO_PKG_VERSION"))
    }

    fn map_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::transport(err)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &RequestMeta) -> Result<ResponseRecord, FetchError> {
        let mut builder = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(forwardable_headers(request.headers()));
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let response = builder.send().await.map_err(|err| self.map_error(err))?;
        let status = response.status();
        let headers = forwardable_headers(response.headers());
        let body = response.bytes().await.map_err(|err| self.map_error(err))?;
        debug!(url = %request.url(), status = %status, bytes = body.len(), "Origin responded");

        Ok(ResponseRecord::new(status, headers, body))
    }
}

/// Copy `headers` without hop-by-hop entries or anything named by
/// `Connection`.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let connection_listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name)
            || name.as_str() == "keep-alive"
            || connection_listed.iter().any(|listed| listed == name.as_str())
        {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("proxy.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        headers.append(header::COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));

        let forwarded = forwardable_headers(&headers);

        assert!(forwarded.get(header::HOST).is_none());
        assert!(forwarded.get(header::CONNECTION).is_none());
        assert!(forwarded.get("x-trace").is_none());
        assert!(forwarded.get("keep-alive").is_none());
        assert_eq!(forwarded.get(header::ACCEPT).unwrap(), "text/html");
        assert_eq!(forwarded.get_all(header::COOKIE).iter().count(), 2);
    }

    #[test]
    fn client_builds_with_default_timeout() {
        assert!(HttpFetcher::new().is_ok());
        assert!(HttpFetcher::user_agent().starts_with("offgrid/"));
    }
}
