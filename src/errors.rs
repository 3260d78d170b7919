use std::net::SocketAddr;

use thiserror::Error;

use crate::wire::FramingError;

// -----------------------------------------------------------------------------
// ----- ProxyError ------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend rejected credentials: {0}")]
    BackendAuthFailed(String),

    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("forged handshake with {peer} failed: {reason}")]
    AuthForgery { peer: SocketAddr, reason: String },

    #[error("relay {direction} failed: {source}")]
    Relay {
        direction: &'static str,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

// -----------------------------------------------------------------------------
// ----- ErrorClass ------------------------------------------------------------

/// How far an error reaches: the whole proxy, one accept, or one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Fatal,
    Transient,
    Connection,
}

impl ProxyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ProxyError::Bind { .. } | ProxyError::Config(_) => ErrorClass::Fatal,
            ProxyError::Accept(_) => ErrorClass::Transient,
            ProxyError::BackendUnavailable(_)
            | ProxyError::BackendAuthFailed(_)
            | ProxyError::Framing(_)
            | ProxyError::AuthForgery { .. }
            | ProxyError::Relay { .. } => ErrorClass::Connection,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        ProxyError::BackendUnavailable(message.into())
    }

    pub(crate) fn auth_failed(message: impl Into<String>) -> Self {
        ProxyError::BackendAuthFailed(message.into())
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
