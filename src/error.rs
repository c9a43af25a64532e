//! Error types shared across the engine.

use thiserror::Error;

use crate::server::pool::SlotId;

/// Misuse of a response outside of its legal state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("response has already finished")]
    AlreadyFinished,

    #[error("response has already started")]
    AlreadyStarted,

    #[error("response is already suspended")]
    AlreadySuspended,

    /// The response was handed to a [`Suspended`](crate::http::response::Suspended)
    /// capability and must be driven through it.
    #[error("response was handed off by suspend()")]
    Detached,

    #[error("unsupported character encoding: {0}")]
    UnsupportedCharset(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("{0} already has an outstanding exchange")]
    SlotBusy(SlotId),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
