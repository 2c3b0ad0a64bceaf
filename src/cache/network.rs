//! Network capability consumed by the strategies.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::request::RequestMeta;
use crate::domain::response::ResponseRecord;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("network request timed out after {0:?}")]
    Timeout(Duration),
    #[error("network request failed: {0}")]
    Transport(String),
    #[error("network request was abandoned before completing")]
    Aborted,
}

impl FetchError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Performs a single network attempt for a request.
///
/// Any HTTP response, whatever its status, is a successful fetch. The engine
/// never retries; one failed attempt is final for that invocation.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &RequestMeta) -> Result<ResponseRecord, FetchError>;
}
