//! Error types for the rawwire crate.

use std::io;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or exchanging raw requests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// URL is relative, unparseable, or uses an unsupported scheme.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Raw request buffer cannot be used (malformed request line,
    /// CONNECT payload without a head terminator, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Proxy answered the CONNECT handshake with something other than 200.
    #[error("proxy tunnel failed: {0}")]
    TunnelFailure(String),

    /// No response byte arrived before the absolute deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Connection-level failure (dial, proxy forward leg).
    #[error("connection error: {0}")]
    Connection(String),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Response status/body decoding failed on demand.
    #[error("response decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Create an invalid-URL error.
    pub fn invalid_url(message: impl Into<String>) -> Self {
        Self::InvalidUrl(message.into())
    }

    /// Create an invalid-request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Whether this error marks a pooled connection the peer closed while
    /// it sat idle: EOF before any response byte, or an OS-level
    /// closed-socket report. Recovered by a single redial.
    pub fn is_stale_connection(&self) -> bool {
        let Error::Io(err) = self else {
            return false;
        };
        if matches!(
            err.kind(),
            io::ErrorKind::UnexpectedEof
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::ConnectionReset
        ) {
            return true;
        }
        let text = err.to_string();
        text.contains("broken pipe")
            || text.contains("connection reset")
            || text.contains("use of closed network connection")
    }

    /// Whether this error is the Phase-1 absolute deadline firing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}
