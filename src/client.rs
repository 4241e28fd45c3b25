//! Client: template transform, request dispatch, pooling policy, and the
//! one-shot stale retry.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::pool::{pool_key, ConnPool};
use crate::request::Request;
use crate::response::Response;
use crate::template::{self, Transform};
use crate::transport::connector::{Conn, Connector, TlsOptions};
use crate::transport::exchange::{exchange, DEFAULT_QUIET_TIMEOUT, DEFAULT_TIMEOUT};
use crate::transport::proxy::HttpProxyConnector;

/// Cap on a raw CONNECT handshake response (2 MiB).
const TUNNEL_RESPONSE_LIMIT: usize = 2 * 1024 * 1024;

/// Raw HTTP/1.1 client.
///
/// A `Client` is cheap to share behind an `Arc` and safe for concurrent
/// `send` calls; the [`Request`]/[`Response`] pair handed to each call is
/// owned by that call alone.
pub struct Client {
    transform: Transform,
    timeout: Duration,
    quiet_timeout: Duration,
    pool: Arc<ConnPool>,
    disable_keep_alive: bool,
    proxy: Option<HttpProxyConnector>,
    connector: Connector,
}

impl Client {
    /// Client with all defaults: full template preparation, 10 s absolute
    /// timeout, 10 ms quiet window, fresh default pool, no proxy.
    pub fn new() -> Self {
        Self {
            transform: Transform::Full,
            timeout: DEFAULT_TIMEOUT,
            quiet_timeout: DEFAULT_QUIET_TIMEOUT,
            pool: Arc::new(ConnPool::default()),
            disable_keep_alive: false,
            proxy: None,
            connector: Connector::new(DEFAULT_TIMEOUT, TlsOptions::default()),
        }
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The pool backing this client's keep-alive reuse.
    pub fn pool(&self) -> &Arc<ConnPool> {
        &self.pool
    }

    /// Close all idle pooled connections; the client stays usable.
    pub fn close_idle_connections(&self) {
        self.pool.close_idle();
    }

    /// Close all idle pooled connections and shut the pool down.
    pub fn close(&self) {
        self.pool.close_all();
    }

    /// Perform one request/response exchange.
    ///
    /// Parses the URL and the template, applies the configured transform,
    /// then routes: an authored `CONNECT ` buffer opens its own tunnel, a
    /// configured proxy tunnels everything else, and plain http/https go
    /// straight to the origin with pool reuse and a single redial when a
    /// pooled connection turns out to be dead.
    pub async fn send(&self, req: &mut Request, resp: &mut Response) -> Result<()> {
        let uri = Url::parse(&req.url)
            .map_err(|e| Error::invalid_url(format!("{}: {e}", req.url)))?;
        req.uri = Some(uri);
        req.parse()?;
        self.transform.apply(req);

        if req.raw.starts_with(b"CONNECT ") {
            return self.send_tunnel(req, resp).await;
        }
        if self.proxy.is_some() {
            return self.send_via_proxy(req, resp).await;
        }

        match self.target(req)? {
            ("http", host, port) => self.send_origin(req, resp, &host, port, false).await,
            ("https", host, port) => self.send_origin(req, resp, &host, port, true).await,
            (scheme, ..) => Err(Error::invalid_url(format!(
                "unsupported scheme {scheme:?} in {}",
                req.url
            ))),
        }
    }

    /// Scheme, hostname, and explicit port of the request target.
    fn target<'r>(&self, req: &'r Request) -> Result<(&'r str, String, u16)> {
        let uri = req
            .uri
            .as_ref()
            .ok_or_else(|| Error::invalid_url("request URL not parsed"))?;
        let scheme = uri.scheme();
        let host = uri
            .host_str()
            .ok_or_else(|| Error::invalid_url(format!("no host in {}", req.url)))?
            .to_string();
        let port = uri
            .port_or_known_default()
            .unwrap_or(if scheme == "https" { 443 } else { 80 });
        Ok((scheme, host, port))
    }

    async fn send_origin(
        &self,
        req: &Request,
        resp: &mut Response,
        host: &str,
        port: u16,
        tls: bool,
    ) -> Result<()> {
        let scheme = if tls { "https" } else { "http" };
        let key = pool_key(scheme, host, port);

        if !self.disable_keep_alive {
            if let Some(conn) = self.pool.get(&key) {
                debug!(key = %key, "reusing pooled connection");
                match self.exchange_and_pool(conn, req, resp, &key).await {
                    Err(e) if e.is_stale_connection() => {
                        debug!(key = %key, error = %e, "pooled connection stale, redialing");
                        resp.reset();
                    }
                    other => return other,
                }
            }
        }

        let conn = self.connector.dial(&req.addr(port), host, tls).await?;
        self.exchange_and_pool(conn, req, resp, &key).await
    }

    /// Run the exchange, then either park the connection for reuse or let
    /// it drop closed.
    async fn exchange_and_pool(
        &self,
        mut conn: Conn,
        req: &Request,
        resp: &mut Response,
        key: &str,
    ) -> Result<()> {
        let result = exchange(&mut conn, &req.bytes(), resp, self.timeout, self.quiet_timeout).await;

        let reusable = result.is_ok()
            && !self.disable_keep_alive
            && !req.wants_close()
            && !req.wants_upgrade()
            && !resp.connection_close();
        if reusable && !self.pool.put(key, conn) {
            debug!(key = %key, "pool rejected connection");
        }
        result
    }

    /// Authored tunnel: the buffer's own `CONNECT` preface performs the
    /// handshake, then the remainder becomes the inner request on the
    /// same connection. Never pooled.
    async fn send_tunnel(&self, req: &mut Request, resp: &mut Response) -> Result<()> {
        let Some(idx) = template::find_subslice(&req.raw, b"\r\n\r\n") else {
            return Err(Error::invalid_request(
                "CONNECT payload without a head terminator",
            ));
        };
        let preface = req.raw[..idx + 4].to_vec();
        let remainder = req.raw[idx + 4..].to_vec();

        let (scheme, host, port) = self.target(req)?;
        let tls = scheme == "https";
        let mut conn = self.connector.dial(&req.addr(port), &host, tls).await?;

        conn.write_all(&preface).await?;
        conn.flush().await?;

        let mut handshake = vec![0u8; TUNNEL_RESPONSE_LIMIT];
        let n = timeout(self.timeout, conn.read(&mut handshake))
            .await
            .map_err(|_| Error::timeout("tunnel handshake read"))??;
        if template::find_subslice(&handshake[..n], b"200").is_none() {
            return Err(Error::TunnelFailure(format!(
                "cannot connect through proxy, response: {:?}",
                String::from_utf8_lossy(&handshake[..n])
            )));
        }
        debug!(target = %req.addr(port), "authored tunnel established");

        req.set_rawdata(remainder)?;
        self.transform.apply(req);
        exchange(&mut conn, &req.bytes(), resp, self.timeout, self.quiet_timeout).await
    }

    /// Configured proxy: tunnel to the target through the proxy, wrap in
    /// TLS for https targets, exchange, close. Never pooled.
    async fn send_via_proxy(&self, req: &Request, resp: &mut Response) -> Result<()> {
        let Some(proxy) = &self.proxy else {
            return Err(Error::connection("no proxy configured"));
        };
        let (scheme, host, port) = self.target(req)?;
        let tls = scheme == "https";
        let target = req.addr(port);

        let conn = proxy.open(&self.connector, &target).await?;
        let mut conn = if tls {
            self.connector.wrap_tls(&host, conn).await?
        } else {
            conn
        };
        exchange(&mut conn, &req.bytes(), resp, self.timeout, self.quiet_timeout).await
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    transform: Transform,
    timeout: Duration,
    quiet_timeout: Duration,
    pool: Option<Arc<ConnPool>>,
    disable_keep_alive: bool,
    proxy: Option<Url>,
    tls: TlsOptions,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            transform: Transform::Full,
            timeout: DEFAULT_TIMEOUT,
            quiet_timeout: DEFAULT_QUIET_TIMEOUT,
            pool: None,
            disable_keep_alive: false,
            proxy: None,
            tls: TlsOptions::default(),
        }
    }

    /// Template pass applied on `send`: full preparation or
    /// variables-only.
    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Absolute deadline for one exchange (default 10 s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Quiet window that ends the read phase once data has arrived
    /// (default 10 ms; zero selects the default).
    pub fn quiet_timeout(mut self, quiet_timeout: Duration) -> Self {
        self.quiet_timeout = quiet_timeout;
        self
    }

    /// Use a shared pool instead of a fresh default one.
    pub fn pool(mut self, pool: Arc<ConnPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Bypass the pool entirely: every exchange dials and closes.
    pub fn disable_keep_alive(mut self, disable: bool) -> Self {
        self.disable_keep_alive = disable;
        self
    }

    /// Route all non-CONNECT requests through this forward proxy.
    pub fn proxy(mut self, uri: Url) -> Self {
        self.proxy = Some(uri);
        self
    }

    /// TLS verification knobs (verification is off by default).
    pub fn tls_options(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub fn build(self) -> Result<Client> {
        let quiet_timeout = if self.quiet_timeout.is_zero() {
            DEFAULT_QUIET_TIMEOUT
        } else {
            self.quiet_timeout
        };
        let proxy = self
            .proxy
            .as_ref()
            .map(HttpProxyConnector::from_url)
            .transpose()?;
        Ok(Client {
            transform: self.transform,
            timeout: self.timeout,
            quiet_timeout,
            pool: self.pool.unwrap_or_else(|| Arc::new(ConnPool::default())),
            disable_keep_alive: self.disable_keep_alive,
            proxy,
            connector: Connector::new(self.timeout, self.tls),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
