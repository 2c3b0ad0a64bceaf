//! Request metadata seen by the classifier and the strategies.

use std::fmt;

use axum::http::{HeaderMap, HeaderValue, Method, header};
use bytes::Bytes;
use url::{Origin, Url};

use super::error::DomainError;
use super::types::Destination;

/// Everything the engine knows about an intercepted request.
///
/// Classification only looks at the method, the `Accept` header, the declared
/// destination, the navigation flag and the URL. Headers and body are carried
/// along so the network capability can replay the request.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    method: Method,
    url: Url,
    headers: HeaderMap,
    destination: Option<Destination>,
    navigate: bool,
    body: Bytes,
}

impl RequestMeta {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            destination: None,
            navigate: false,
            body: Bytes::new(),
        }
    }

    /// Parse `url` and build a GET request for it.
    pub fn get(url: &str) -> Result<Self, DomainError> {
        let parsed = Url::parse(url).map_err(|err| DomainError::invalid_url(url, err))?;
        Ok(Self::new(Method::GET, parsed))
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the `Accept` header. Values that are not valid header text are ignored.
    pub fn with_accept(mut self, accept: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(accept) {
            self.headers.insert(header::ACCEPT, value);
        }
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Mark the request as a top-level navigation.
    pub fn navigation(mut self) -> Self {
        self.navigate = true;
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn accept(&self) -> Option<&str> {
        self.headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok())
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn is_navigation(&self) -> bool {
        self.navigate
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_same_origin(&self, origin: &Origin) -> bool {
        &self.url.origin() == origin
    }

    /// Canonical cache identity of this request.
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.method.clone(), &self.url)
    }
}

/// Canonical request identity used as the cache entry key: method plus URL
/// without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: Method,
    url: String,
}

impl RequestKey {
    pub fn new(method: Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method,
            url: url.into(),
        }
    }

    pub fn get(url: &Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
