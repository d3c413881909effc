//! Router error types
//!
//! `Display` output doubles as the client-facing `error` string of a failed
//! `ProcessResponse`, so the messages are kept short and stable.

use std::time::Duration;
use thiserror::Error;

use gg_common::{truncate, MAX_ERROR_LEN};

#[derive(Error, Debug)]
pub enum RouterError {
    /// The requested service type is not in the registry
    #[error("unknown service type")]
    UnknownService { service_type: String },

    /// The service is unhealthy and the caller disabled fallback
    #[error("service unavailable")]
    Unavailable { service_type: String },

    /// The effective timeout elapsed before the backend answered
    #[error("timeout")]
    Timeout { after: Duration },

    /// The backend answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    Protocol { status: u16, body: String },

    /// DNS or connection level failure
    #[error("{0}")]
    Connection(String),

    /// The gateway no longer accepts work
    #[error("gateway shutting down")]
    ShuttingDown,

    /// HTTP client could not be constructed
    #[error("Transport error: {0}")]
    Transport(String),
}

impl RouterError {
    pub fn protocol(status: u16, body: &str) -> Self {
        Self::Protocol {
            status,
            body: truncate(body, MAX_ERROR_LEN),
        }
    }

    pub fn connection(message: impl AsRef<str>) -> Self {
        Self::Connection(truncate(message.as_ref(), MAX_ERROR_LEN))
    }

    /// Short stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::UnknownService { .. } => "routing",
            RouterError::Unavailable { .. } => "unavailable",
            RouterError::Timeout { .. } => "timeout",
            RouterError::Protocol { .. } => "protocol",
            RouterError::Connection(_) => "connection",
            RouterError::ShuttingDown => "shutdown",
            RouterError::Transport(_) => "transport",
        }
    }
}
