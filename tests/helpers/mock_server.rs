// not every test binary exercises every helper
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A raw TCP mock origin. Each `start_*` method consumes the server and
/// spawns an accept loop with one scripted behavior.
pub struct MockServer {
    listener: TcpListener,
    port: u16,
    accepted: Arc<AtomicUsize>,
}

impl MockServer {
    pub async fn new() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            port,
            accepted: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Counter of accepted connections, shared with the accept loop.
    pub fn accepted(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.accepted)
    }

    /// Keep-alive server: answers every request on a connection with
    /// `200 hello`, closing only when the request asked for it.
    pub fn start_keepalive(self) -> tokio::task::JoinHandle<()> {
        self.spawn(|mut stream| async move {
            loop {
                let Some(request) = read_head(&mut stream).await else {
                    break;
                };
                let close = contains(&request, b"Connection: close");
                let response: &[u8] = if close {
                    b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello"
                } else {
                    b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: keep-alive\r\n\r\nhello"
                };
                if stream.write_all(response).await.is_err() {
                    break;
                }
                let _ = stream.flush().await;
                if close {
                    break;
                }
            }
        })
    }

    /// Answers one request claiming keep-alive, then drops the
    /// connection, so every pooled connection to this server goes stale.
    pub fn start_close_after_one(self) -> tokio::task::JoinHandle<()> {
        self.spawn(|mut stream| async move {
            if read_head(&mut stream).await.is_some() {
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: keep-alive\r\n\r\nhello",
                    )
                    .await;
                let _ = stream.flush().await;
            }
        })
    }

    /// Sends `payload` after the request head, then holds the connection
    /// open without further bytes.
    pub fn start_hold_after(self, payload: Vec<u8>) -> tokio::task::JoinHandle<()> {
        self.spawn(move |mut stream| {
            let payload = payload.clone();
            async move {
                if read_head(&mut stream).await.is_some() {
                    let _ = stream.write_all(&payload).await;
                    let _ = stream.flush().await;
                    tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                }
            }
        })
    }

    /// Reads the request head and never answers.
    pub fn start_silent(self) -> tokio::task::JoinHandle<()> {
        self.spawn(|mut stream| async move {
            let _ = read_head(&mut stream).await;
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        })
    }

    fn spawn<H, F>(self, handler: H) -> tokio::task::JoinHandle<()>
    where
        H: Fn(TcpStream) -> F + Clone + Send + 'static,
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = self.listener;
        let accepted = self.accepted;
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        accepted.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(handler.clone()(stream));
                    }
                    Err(_) => break,
                }
            }
        })
    }
}

/// Read one request head (through the blank line). `None` on EOF or error.
pub async fn read_head(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    loop {
        if find(&head, b"\r\n\r\n").is_some() {
            return Some(head);
        }
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
}

pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}
