use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Relay config error: {field}: {reason}")]
    Config { field: String, reason: String },

    #[error("Token limit exceeded: {got} tokens, max {max}")]
    TokenLimitExceeded { got: usize, max: usize },

    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Failure reported by an upstream source while it is being pulled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream rate limited: {0}")]
    RateLimited(String),

    #[error("upstream connection lost: {0}")]
    Connection(String),

    #[error("upstream protocol error: {0}")]
    Protocol(String),

    #[error("upstream failed: {0}")]
    Other(String),
}

/// Failure reported by the client transport while a chunk is being written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("client disconnected")]
    Disconnected,

    #[error("write failed: {0}")]
    Write(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => TransportError::Disconnected,
            _ => TransportError::Write(err.to_string()),
        }
    }
}
