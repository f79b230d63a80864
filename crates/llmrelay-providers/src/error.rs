use llmrelay_core::UpstreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error ({status}): {message}")]
    Status {
        provider: String,
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Upstream stream error: {0}")]
    Stream(#[from] UpstreamError),
}

impl ProviderError {
    pub fn invalid_response(provider: &str, reason: impl Into<String>) -> Self {
        ProviderError::InvalidResponse {
            provider: provider.to_string(),
            reason: reason.into(),
        }
    }

    /// Rate limits, server errors, and connection-level failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect(),
            ProviderError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            ProviderError::Stream(e) => matches!(
                e,
                UpstreamError::RateLimited(_) | UpstreamError::Connection(_)
            ),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ProviderError::Status { retry_after_secs, .. } => *retry_after_secs,
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Status { status, .. } => Some(*status),
            ProviderError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout(),
            ProviderError::Status { status, .. } => *status == 504 || *status == 408,
            _ => false,
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> ProviderError {
        ProviderError::Status {
            provider: "OpenAI".to_string(),
            status: code,
            message: "x".to_string(),
            retry_after_secs: Some(3),
        }
    }

    #[test]
    fn test_rate_limit_and_server_errors_are_retryable() {
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(401).is_retryable());
    }

    #[test]
    fn test_stream_errors_follow_upstream_kind() {
        let conn = ProviderError::from(UpstreamError::Connection("reset".into()));
        let proto = ProviderError::from(UpstreamError::Protocol("bad".into()));
        assert!(conn.is_retryable());
        assert!(!proto.is_retryable());
    }

    #[test]
    fn test_retry_after_exposed_for_status() {
        assert_eq!(status(429).retry_after(), Some(3));
        assert_eq!(status(429).status(), Some(429));
    }
}
