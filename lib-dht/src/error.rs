//! Distinguished error kinds surfaced across the public API (see the error
//! handling design: protocol / crypto / state / timeout / io / fatal).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cryptographic validation failed: {0}")]
    Crypto(String),

    #[error("state error: {0}")]
    State(String),

    #[error("request timed out")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fatal startup error: {0}")]
    Fatal(String),

    #[error("not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, NodeError>;

impl NodeError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        NodeError::InvalidArgument(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        NodeError::Protocol(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        NodeError::Crypto(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        NodeError::State(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        NodeError::Io(std::io::Error::other(msg.into()))
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        NodeError::Fatal(msg.into())
    }
}
