use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::worker::LifecycleError, cache::StrategyError, domain::error::DomainError,
    infra::error::InfraError,
};

/// Error chain attached to failed responses so logging middleware can
/// report the cause without exposing it to clients.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn report(&self) -> &ErrorReport {
        &self.report
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<StrategyError> for HttpError {
    fn from(error: StrategyError) -> Self {
        match &error {
            StrategyError::CacheMiss { .. } => HttpError::from_error(
                "infra::http::strategy_error_to_http_error",
                StatusCode::GATEWAY_TIMEOUT,
                "offline, no cached copy",
                &error,
            ),
            StrategyError::NetworkUnavailable(_) => HttpError::from_error(
                "infra::http::strategy_error_to_http_error",
                StatusCode::BAD_GATEWAY,
                "origin unreachable",
                &error,
            ),
        }
    }
}

impl From<LifecycleError> for HttpError {
    fn from(error: LifecycleError) -> Self {
        let (status, message) = match &error {
            LifecycleError::NothingToActivate => (StatusCode::CONFLICT, "No release is waiting"),
            LifecycleError::InvalidRelease(_) => {
                (StatusCode::BAD_REQUEST, "Release could not be processed")
            }
            LifecycleError::Install(_) => (StatusCode::BAD_GATEWAY, "Release install failed"),
            LifecycleError::Activation(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Release activation failed")
            }
        };
        HttpError::from_error(
            "infra::http::lifecycle_error_to_http_error",
            status,
            message,
            &error,
        )
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
