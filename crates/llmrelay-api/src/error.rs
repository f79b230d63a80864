use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use llmrelay_core::{AbortReason, CoreError, UpstreamError};
use llmrelay_providers::ProviderError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Token limit exceeded: {got} > {max}")]
    TokenLimit { got: usize, max: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Upstream rate limit: {0}")]
    RateLimited(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::TokenLimit { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "invalid_request_error",
            ApiError::TokenLimit { .. } => "token_limit_exceeded",
            ApiError::NotFound(_) => "not_found_error",
            ApiError::Timeout => "timeout_error",
            ApiError::RateLimited(_) => "rate_limit_error",
            ApiError::UpstreamTimeout(_) => "upstream_timeout",
            ApiError::Upstream(_) => "upstream_error",
            ApiError::Unavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "internal_server_error",
        }
    }

    /// `{"error": {"message", "type", "code"}}`, also used for in-stream error frames.
    pub fn body(&self) -> Value {
        let message = match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::RateLimited(msg)
            | ApiError::UpstreamTimeout(msg)
            | ApiError::Upstream(msg)
            | ApiError::Unavailable(msg)
            | ApiError::Internal(msg) => msg.clone(),
            ApiError::Timeout => "Request timed out".to_string(),
            ApiError::TokenLimit { .. } => self.to_string(),
        };

        json!({
            "error": {
                "message": message,
                "type": self.error_type(),
                "code": self.status().as_u16()
            }
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::TokenLimitExceeded { got, max } => ApiError::TokenLimit { got, max },
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::RateLimited(msg) => ApiError::RateLimited(msg),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(e: ProviderError) -> Self {
        if e.is_timeout() {
            return ApiError::UpstreamTimeout(e.to_string());
        }
        match e {
            ProviderError::Stream(inner) => ApiError::from(inner),
            other => match other.status() {
                Some(429) => ApiError::RateLimited(other.to_string()),
                // The provider rejected what the client asked for.
                Some(400) => ApiError::BadRequest(other.to_string()),
                _ => ApiError::Upstream(other.to_string()),
            },
        }
    }
}

impl From<&AbortReason> for ApiError {
    fn from(reason: &AbortReason) -> Self {
        match reason {
            AbortReason::UpstreamFailed(e) => ApiError::from(e.clone()),
            AbortReason::Timeout => ApiError::UpstreamTimeout(reason.to_string()),
            AbortReason::ChunkTooLarge { .. } | AbortReason::SequenceGap { .. } => {
                ApiError::Upstream(reason.to_string())
            }
            AbortReason::Cancelled => ApiError::Unavailable("server is shutting down".to_string()),
            AbortReason::ClientDisconnected => ApiError::Internal(reason.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
