//! Idle connection pool: per-origin LIFO reuse, bounded and TTL'd.
//!
//! Connections are owned exclusively: by the pool while idle, by the
//! caller after `get`. The mutex only ever guards map operations; closing
//! a connection is dropping it, which involves no I/O wait.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::transport::Conn;

pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 5;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Pool key for an origin: `scheme://host:port`, port always explicit.
pub fn pool_key(scheme: &str, host: &str, port: u16) -> String {
    format!("{scheme}://{host}:{port}")
}

/// A live connection parked in the pool.
struct PooledConn {
    conn: Conn,
    idle_at: Instant,
}

struct Inner {
    conns: HashMap<String, Vec<PooledConn>>,
    closed: bool,
}

/// Thread-safe idle connection pool keyed by origin.
pub struct ConnPool {
    inner: Mutex<Inner>,
    max_idle_per_host: usize,
    idle_timeout: Duration,
}

impl ConnPool {
    /// Zero values fall back to the defaults (5 per host, 90 s idle).
    pub fn new(max_idle_per_host: usize, idle_timeout: Duration) -> Self {
        let max_idle_per_host = if max_idle_per_host == 0 {
            DEFAULT_MAX_IDLE_PER_HOST
        } else {
            max_idle_per_host
        };
        let idle_timeout = if idle_timeout.is_zero() {
            DEFAULT_IDLE_TIMEOUT
        } else {
            idle_timeout
        };
        Self {
            inner: Mutex::new(Inner {
                conns: HashMap::new(),
                closed: false,
            }),
            max_idle_per_host,
            idle_timeout,
        }
    }

    /// Most recently parked connection for `key`, after evicting expired
    /// entries. `None` when the pool is closed or has nothing usable.
    pub fn get(&self, key: &str) -> Option<Conn> {
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }
        Self::evict_expired(&mut inner, key, self.idle_timeout);

        let list = inner.conns.get_mut(key)?;
        let parked = list.pop();
        if list.is_empty() {
            inner.conns.remove(key);
        }
        parked.map(|p| p.conn)
    }

    /// Park a connection for reuse. Returns `false` when the pool is
    /// closed or the per-host cap is reached; a rejected connection is
    /// dropped, which closes it.
    pub fn put(&self, key: &str, conn: Conn) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        Self::evict_expired(&mut inner, key, self.idle_timeout);

        if inner.conns.get(key).map_or(0, Vec::len) >= self.max_idle_per_host {
            return false;
        }
        inner.conns.entry(key.to_string()).or_default().push(PooledConn {
            conn,
            idle_at: Instant::now(),
        });
        true
    }

    /// Close every idle connection and refuse all further traffic.
    pub fn close_all(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.conns.clear();
    }

    /// Close every idle connection but keep the pool usable.
    pub fn close_idle(&self) {
        let mut inner = self.lock();
        inner.conns.clear();
    }

    /// Total idle connections across all origins.
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.conns.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Idle connections parked for one origin key.
    pub fn len_for_host(&self, key: &str) -> usize {
        let inner = self.lock();
        inner.conns.get(key).map_or(0, Vec::len)
    }

    /// Whether `close_all` has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop (close) entries for `key` that idled past the timeout.
    fn evict_expired(inner: &mut Inner, key: &str, idle_timeout: Duration) {
        let now = Instant::now();
        if let Some(list) = inner.conns.get_mut(key) {
            list.retain(|parked| now.duration_since(parked.idle_at) < idle_timeout);
            if list.is_empty() {
                inner.conns.remove(key);
            }
        }
    }
}

impl Default for ConnPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_PER_HOST, DEFAULT_IDLE_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory stand-in for a live connection.
    fn fake_conn() -> Conn {
        let (client, _server) = tokio::io::duplex(64);
        Box::new(client)
    }

    #[test]
    fn pool_key_format() {
        assert_eq!(pool_key("https", "example.com", 443), "https://example.com:443");
        assert_eq!(pool_key("http", "127.0.0.1", 8080), "http://127.0.0.1:8080");
    }

    #[test]
    fn zero_limits_fall_back_to_defaults() {
        let pool = ConnPool::new(0, Duration::ZERO);
        assert_eq!(pool.max_idle_per_host, DEFAULT_MAX_IDLE_PER_HOST);
        assert_eq!(pool.idle_timeout, DEFAULT_IDLE_TIMEOUT);
    }

    #[test]
    fn get_from_empty_pool() {
        let pool = ConnPool::default();
        assert!(pool.get("https://example.com:443").is_none());
    }

    #[test]
    fn put_then_get() {
        let pool = ConnPool::default();
        let key = "https://example.com:443";

        assert!(pool.put(key, fake_conn()));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.len_for_host(key), 1);

        assert!(pool.get(key).is_some());
        assert_eq!(pool.len(), 0);
        assert!(pool.get(key).is_none());
    }

    #[test]
    fn put_respects_per_host_cap() {
        let pool = ConnPool::new(3, Duration::from_secs(90));
        let key = "http://example.com:80";

        for _ in 0..3 {
            assert!(pool.put(key, fake_conn()));
        }
        assert!(!pool.put(key, fake_conn()));
        assert_eq!(pool.len_for_host(key), 3);
    }

    #[test]
    fn cap_is_per_host_not_global() {
        let pool = ConnPool::new(1, Duration::from_secs(90));
        assert!(pool.put("http://a:80", fake_conn()));
        assert!(pool.put("http://b:80", fake_conn()));
        assert!(!pool.put("http://a:80", fake_conn()));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn expired_connections_are_evicted() {
        let pool = ConnPool::new(5, Duration::from_millis(10));
        let key = "https://example.com:443";

        assert!(pool.put(key, fake_conn()));
        std::thread::sleep(Duration::from_millis(25));
        assert!(pool.get(key).is_none());
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn close_all_rejects_further_traffic() {
        let pool = ConnPool::default();
        let key = "https://example.com:443";

        assert!(pool.put(key, fake_conn()));
        pool.close_all();

        assert!(pool.is_closed());
        assert_eq!(pool.len(), 0);
        assert!(pool.get(key).is_none());
        assert!(!pool.put(key, fake_conn()));
    }

    #[test]
    fn close_idle_keeps_pool_usable() {
        let pool = ConnPool::default();
        let key = "https://example.com:443";

        assert!(pool.put(key, fake_conn()));
        pool.close_idle();

        assert!(!pool.is_closed());
        assert_eq!(pool.len(), 0);
        assert!(pool.put(key, fake_conn()));
    }

    #[tokio::test]
    async fn get_returns_most_recently_parked_first() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let pool = ConnPool::default();
        let key = "https://example.com:443";

        // each parked conn is tagged by a byte its peer already wrote
        let mut peers = Vec::new();
        for tag in [b'a', b'b', b'c'] {
            let (client, mut server) = tokio::io::duplex(8);
            server.write_all(&[tag]).await.unwrap();
            peers.push(server);
            assert!(pool.put(key, Box::new(client)));
        }

        for want in [b'c', b'b', b'a'] {
            let mut conn = pool.get(key).expect("pooled conn");
            let mut byte = [0u8; 1];
            conn.read_exact(&mut byte).await.unwrap();
            assert_eq!(byte[0], want);
        }
    }

    #[test]
    fn concurrent_put_and_get() {
        use std::sync::Arc;

        let pool = Arc::new(ConnPool::new(100, Duration::from_secs(90)));
        let key = "https://example.com:443";

        let mut handles = Vec::new();
        for _ in 0..50 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                pool.put(key, fake_conn());
                pool.get(key);
            }));
        }
        for handle in handles {
            let _ = handle.join();
        }
        assert!(pool.len() <= 100);
    }
}
