//! One request/response exchange with the two-phase read timeout.
//!
//! Phase 1 waits for the first response byte until the absolute deadline.
//! Phase 2 keeps reading while bytes keep arriving; a quiet window with
//! nothing on the wire is the normal end-of-response signal, not an
//! error. The absolute deadline caps both phases.

use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout_at;
use tracing::debug;

use crate::error::{Error, Result};
use crate::response::Response;
use crate::transport::Conn;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_QUIET_TIMEOUT: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 4096;

/// Write `payload` in full, then collect the response into `resp.raw`.
///
/// Timings are measured from write completion. EOF before the first byte
/// surfaces as an `UnexpectedEof` IO error, the stale-connection signal
/// the caller may recover from; EOF after data is a complete response.
pub(crate) async fn exchange(
    conn: &mut Conn,
    payload: &[u8],
    resp: &mut Response,
    timeout: Duration,
    quiet_timeout: Duration,
) -> Result<()> {
    conn.write_all(payload).await?;
    conn.flush().await?;

    let write_complete = Instant::now();
    let absolute = tokio::time::Instant::from_std(write_complete + timeout);
    let mut buf = [0u8; READ_CHUNK];
    let mut received = false;

    loop {
        let deadline = if received {
            absolute.min(tokio::time::Instant::now() + quiet_timeout)
        } else {
            absolute
        };
        match timeout_at(deadline, conn.read(&mut buf)).await {
            Err(_) => {
                if received {
                    return Ok(());
                }
                return Err(Error::timeout(format!(
                    "no response within {timeout:?}"
                )));
            }
            Ok(Ok(0)) => {
                if received {
                    return Ok(());
                }
                return Err(Error::from(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before any response byte",
                )));
            }
            Ok(Ok(n)) => {
                let elapsed = write_complete.elapsed();
                if !received {
                    resp.time_to_first_byte = elapsed;
                    received = true;
                }
                resp.time_to_last_byte = elapsed;
                resp.raw.extend_from_slice(&buf[..n]);
            }
            Ok(Err(e)) => {
                // a TLS peer tearing down mid-read still delivered the response
                if e.to_string().ends_with("tls: user canceled") {
                    debug!("read ended by TLS user-cancel alert");
                    return Ok(());
                }
                return Err(Error::from(e));
            }
        }
    }
}
