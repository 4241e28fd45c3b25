//! Timeout-bounded dialing and TLS wrapping.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};

/// Byte stream carrying one origin's traffic, plaintext or TLS.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Owned connection handle. Dropping it closes the socket.
pub type Conn = Box<dyn Stream>;

/// TLS verification knobs. Probing arbitrary endpoints is the point of
/// this client, so verification is off unless turned back on.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    pub accept_invalid_certs: bool,
    pub accept_invalid_hostnames: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            accept_invalid_certs: true,
            accept_invalid_hostnames: true,
        }
    }
}

/// Dials origins within a fixed timeout, optionally wrapping in TLS.
#[derive(Debug, Clone)]
pub struct Connector {
    timeout: Duration,
    tls: TlsOptions,
}

impl Connector {
    pub fn new(timeout: Duration, tls: TlsOptions) -> Self {
        Self { timeout, tls }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Dial a plaintext TCP connection.
    pub async fn dial_tcp(&self, addr: &str) -> Result<TcpStream> {
        debug!(addr = %addr, "dialing");
        timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::timeout(format!("dial {addr}")))?
            .map_err(|e| Error::connection(format!("failed to connect to {addr}: {e}")))
    }

    /// Dial `addr` and, for `tls`, run the handshake with `host` as SNI.
    /// `addr` may point at an IP override; `host` stays the URL hostname.
    pub async fn dial(&self, addr: &str, host: &str, tls: bool) -> Result<Conn> {
        let stream = self.dial_tcp(addr).await?;
        if tls {
            self.wrap_tls(host, stream).await
        } else {
            Ok(Box::new(stream))
        }
    }

    /// TLS-wrap an established stream; the handshake runs under the same
    /// timeout as dialing.
    pub async fn wrap_tls<S>(&self, host: &str, stream: S) -> Result<Conn>
    where
        S: Stream + 'static,
    {
        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(self.tls.accept_invalid_certs)
            .danger_accept_invalid_hostnames(self.tls.accept_invalid_hostnames)
            .build()
            .map_err(|e| Error::tls(format!("failed to build TLS connector: {e}")))?;
        let tls = tokio_native_tls::TlsConnector::from(tls);

        let wrapped = timeout(self.timeout, tls.connect(host, stream))
            .await
            .map_err(|_| Error::timeout(format!("TLS handshake with {host}")))?
            .map_err(|e| Error::tls(format!("TLS handshake with {host} failed: {e}")))?;
        Ok(Box::new(wrapped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_defaults_to_skip_verify() {
        let opts = TlsOptions::default();
        assert!(opts.accept_invalid_certs);
        assert!(opts.accept_invalid_hostnames);
    }

    #[tokio::test]
    async fn dial_refused_port_is_connection_error() {
        let connector = Connector::new(Duration::from_millis(500), TlsOptions::default());
        // bind-then-drop leaves a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connector.dial_tcp(&addr.to_string()).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn dial_times_out_on_blackhole() {
        let connector = Connector::new(Duration::from_millis(50), TlsOptions::default());
        // RFC 5737 TEST-NET address drops SYNs
        let result = connector.dial_tcp("192.0.2.1:81").await;
        assert!(matches!(result, Err(Error::Timeout(_)) | Err(Error::Connection(_))));
    }
}
