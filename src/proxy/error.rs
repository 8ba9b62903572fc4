//! Error types for proxy operations.

use thiserror::Error;

/// Unified error type for the transport relays.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Client sent something that is not a proxyable request.
    #[error("Invalid proxy request: {0}")]
    InvalidRequest(String),

    /// Failed to connect to the requested upstream.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },

    /// Request head exceeded the size limit before the header terminator.
    #[error("Request head too large")]
    HeadTooLarge,
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
