use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid request url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported request method `{0}`")]
    InvalidMethod(String),
}

impl DomainError {
    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
