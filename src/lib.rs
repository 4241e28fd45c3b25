//! # rawwire
//!
//! Raw HTTP/1.1 client for security testing and protocol experimentation.
//!
//! Unlike a conventional HTTP client, rawwire treats the request as a
//! user-authored byte buffer: duplicate headers, unusual ordering, and
//! intentional malformations all reach the wire exactly as written, after
//! `||TOKEN||` template expansion. Responses come back as raw bytes and
//! are decoded only on demand.
//!
//! ```rust,no_run
//! # async fn run() -> rawwire::Result<()> {
//! let client = rawwire::Client::new();
//! let mut req = rawwire::Request::base("https://example.com/")?;
//! let mut resp = rawwire::Response::new();
//! client.send(&mut req, &mut resp).await?;
//! println!("{} ({} bytes)", resp.status_code()?, resp.body()?.len());
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod client;
pub mod error;
pub mod pool;
pub mod request;
pub mod response;
pub mod template;

// Transport layer
pub mod transport;

// Re-exports for convenient access
pub use client::{Client, ClientBuilder};
pub use error::{Error, Result};
pub use pool::{pool_key, ConnPool};
pub use request::{HeaderLine, Request};
pub use response::Response;
pub use template::Transform;

// Transport re-exports
pub use transport::connector::{Conn, Connector, Stream, TlsOptions};
pub use transport::proxy::{HttpProxyConnector, PrefixedStream};
