//! Transport layer: dialing, TLS wrapping, the exchange loop, and
//! CONNECT proxy tunnels.

pub mod connector;
pub(crate) mod exchange;
pub mod proxy;

pub use connector::{Conn, Connector, Stream, TlsOptions};
pub use proxy::{HttpProxyConnector, PrefixedStream};
