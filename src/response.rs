//! Raw response holder with on-demand decoding.
//!
//! The exchange loop only appends bytes to `raw`; nothing is interpreted
//! until `status_code()`/`body()` is called. Decoding honors chunked and
//! Content-Length framing and unwraps gzip/deflate/brotli bodies.

use std::io::Read;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::template::{find_subslice, split_crlf, trim_bytes};

/// Maximum number of response headers to parse.
const MAX_HEADERS_COUNT: usize = 100;

/// Raw response bytes plus timing measurements, with a lazily decoded
/// status/body view.
#[derive(Debug, Default)]
pub struct Response {
    /// Every byte read off the wire after the request write.
    pub raw: Vec<u8>,

    /// Delay from request-write completion to the first response byte.
    pub time_to_first_byte: Duration,
    /// Delay from request-write completion to the last response byte.
    pub time_to_last_byte: Duration,

    parsed: bool,
    status_code: u16,
    pre_body: Vec<u8>,
    body: Bytes,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all state so the holder can be reused for a retry.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Decoded status code; parses on first call.
    pub fn status_code(&mut self) -> Result<u16> {
        self.parse()?;
        Ok(self.status_code)
    }

    /// Decoded body (de-chunked, decompressed); parses on first call.
    pub fn body(&mut self) -> Result<&[u8]> {
        self.parse()?;
        Ok(&self.body)
    }

    /// Raw header block (everything before the head terminator).
    pub fn pre_body(&mut self) -> Result<&[u8]> {
        self.parse()?;
        Ok(&self.pre_body)
    }

    /// Header block, blank line, decoded body.
    pub fn bytes(&mut self) -> Result<Bytes> {
        self.parse()?;
        let mut out = Vec::with_capacity(self.pre_body.len() + 4 + self.body.len());
        out.extend_from_slice(&self.pre_body);
        out.extend_from_slice(b"\r\n\r\n");
        out.extend_from_slice(&self.body);
        Ok(Bytes::from(out))
    }

    /// Whether the response demands closing the connection: the first
    /// `Connection` header equals `close`, or the response is empty or
    /// missing its head terminator. Scans the raw head only; never
    /// triggers the full decode.
    pub fn connection_close(&self) -> bool {
        if self.raw.is_empty() {
            return true;
        }
        let Some(head_end) = find_subslice(&self.raw, b"\r\n\r\n") else {
            return true;
        };
        let head = &self.raw[..head_end];
        for line in split_crlf(head).iter().skip(1) {
            if line.is_empty() {
                continue;
            }
            let Some(colon) = line.iter().position(|&b| b == b':') else {
                continue;
            };
            if trim_bytes(&line[..colon]).eq_ignore_ascii_case(b"connection") {
                return trim_bytes(&line[colon + 1..]).eq_ignore_ascii_case(b"close");
            }
        }
        false
    }

    fn parse(&mut self) -> Result<()> {
        if self.parsed {
            return Ok(());
        }
        let head_end = find_subslice(&self.raw, b"\r\n\r\n")
            .ok_or_else(|| Error::decode("response head not terminated"))?;

        let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
        let mut parsed = httparse::Response::new(&mut header_storage);
        let header_len = match parsed.parse(&self.raw) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => {
                return Err(Error::decode("incomplete response headers"));
            }
            Err(e) => return Err(Error::decode(format!("failed to parse response: {e}"))),
        };
        let status = parsed
            .code
            .ok_or_else(|| Error::decode("missing status code"))?;

        let transfer_encoding = header_value(parsed.headers, "transfer-encoding");
        let is_chunked = transfer_encoding
            .map(|value| {
                value
                    .split(',')
                    .next_back()
                    .map(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        let content_length = header_value(parsed.headers, "content-length")
            .and_then(|value| value.trim().parse::<usize>().ok());
        let content_encoding =
            header_value(parsed.headers, "content-encoding").map(|value| value.trim().to_ascii_lowercase());

        let tail = &self.raw[header_len..];
        let framed = if is_chunked {
            decode_chunked(tail)?
        } else if let Some(length) = content_length {
            tail[..tail.len().min(length)].to_vec()
        } else {
            tail.to_vec()
        };

        let body = match content_encoding.as_deref() {
            Some("gzip") | Some("x-gzip") => decode_gzip(&framed)?,
            Some("deflate") => decode_deflate(&framed)?,
            Some("br") => decode_brotli(&framed)?,
            // unknown encodings pass through untouched
            _ => Bytes::from(framed),
        };

        self.pre_body = self.raw[..head_end].to_vec();
        self.body = body;
        self.status_code = status;
        self.parsed = true;
        Ok(())
    }
}

fn header_value<'h>(headers: &'h [httparse::Header<'h>], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| String::from_utf8_lossy(header.value).into_owned())
}

/// De-chunk a complete chunked body held in memory.
fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let Some((size, line_end)) = parse_chunk_size(data) else {
            return Err(Error::decode("malformed chunk size"));
        };
        data = &data[line_end..];
        if size == 0 {
            break;
        }
        if data.len() < size {
            return Err(Error::decode("truncated chunk data"));
        }
        body.extend_from_slice(&data[..size]);
        data = &data[size..];
        // chunk data is followed by CRLF
        if data.starts_with(b"\r\n") {
            data = &data[2..];
        }
    }
    Ok(body)
}

/// Parse a chunk-size line, returning (size, end_of_line_position).
/// Chunk extensions after `;` are ignored.
fn parse_chunk_size(data: &[u8]) -> Option<(usize, usize)> {
    let line_end = find_subslice(data, b"\r\n")?;
    let line = String::from_utf8_lossy(&data[..line_end]);
    let size_part = line.split(';').next()?;
    let size = usize::from_str_radix(size_part.trim(), 16).ok()?;
    Some((size, line_end + 2))
}

fn decode_gzip(data: &[u8]) -> Result<Bytes> {
    let mut decoder = flate2::read::GzDecoder::new(data);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::decode(format!("gzip: {e}")))?;
    Ok(Bytes::from(decoded))
}

fn decode_deflate(data: &[u8]) -> Result<Bytes> {
    // servers disagree on whether "deflate" means zlib-wrapped or raw
    let mut decoded = Vec::new();
    if flate2::read::ZlibDecoder::new(data)
        .read_to_end(&mut decoded)
        .is_ok()
    {
        return Ok(Bytes::from(decoded));
    }
    decoded.clear();
    flate2::read::DeflateDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| Error::decode(format!("deflate: {e}")))?;
    Ok(Bytes::from(decoded))
}

fn decode_brotli(data: &[u8]) -> Result<Bytes> {
    let mut decoder = brotli::Decompressor::new(data, 4096);
    let mut decoded = Vec::new();
    decoder
        .read_to_end(&mut decoded)
        .map_err(|e| Error::decode(format!("brotli: {e}")))?;
    Ok(Bytes::from(decoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn response_from(raw: &[u8]) -> Response {
        let mut resp = Response::new();
        resp.raw = raw.to_vec();
        resp
    }

    #[test]
    fn parse_content_length_body() {
        let mut resp = response_from(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
        assert_eq!(resp.status_code().unwrap(), 200);
        assert_eq!(resp.body().unwrap(), b"hello");
        assert_eq!(resp.pre_body().unwrap(), b"HTTP/1.1 200 OK\r\nContent-Length: 5");
    }

    #[test]
    fn content_length_caps_trailing_bytes() {
        let mut resp = response_from(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhelloEXTRA");
        assert_eq!(resp.body().unwrap(), b"hello");
    }

    #[test]
    fn parse_without_length_takes_everything() {
        let mut resp = response_from(b"HTTP/1.1 404 Not Found\r\nServer: x\r\n\r\ngone");
        assert_eq!(resp.status_code().unwrap(), 404);
        assert_eq!(resp.body().unwrap(), b"gone");
    }

    #[test]
    fn parse_chunked_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let mut resp = response_from(raw);
        assert_eq!(resp.body().unwrap(), b"hello world");
    }

    #[test]
    fn chunk_extensions_are_ignored() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5;ext=val\r\nhello\r\n0\r\n\r\n";
        let mut resp = response_from(raw);
        assert_eq!(resp.body().unwrap(), b"hello");
    }

    #[test]
    fn gzip_body_is_decompressed() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"compressed payload").unwrap();
        let compressed = encoder.finish().unwrap();

        let mut raw = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            compressed.len()
        )
        .into_bytes();
        raw.extend_from_slice(&compressed);

        let mut resp = response_from(&raw);
        assert_eq!(resp.body().unwrap(), b"compressed payload");
    }

    #[test]
    fn unknown_encoding_passes_through() {
        let mut resp = response_from(
            b"HTTP/1.1 200 OK\r\nContent-Encoding: snappy\r\nContent-Length: 3\r\n\r\nxyz",
        );
        assert_eq!(resp.body().unwrap(), b"xyz");
    }

    #[test]
    fn bytes_recomposes_head_and_decoded_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\n\r\n";
        let mut resp = response_from(raw);
        assert_eq!(
            resp.bytes().unwrap(),
            &b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nok"[..]
        );
    }

    #[test]
    fn decode_error_on_missing_terminator() {
        let mut resp = response_from(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n");
        assert!(matches!(resp.status_code(), Err(Error::Decode(_))));
    }

    #[test]
    fn connection_close_detection() {
        let close = response_from(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n");
        assert!(close.connection_close());

        let keep = response_from(b"HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n\r\n");
        assert!(!keep.connection_close());

        let mixed_case = response_from(b"HTTP/1.1 200 OK\r\nCONNECTION: CLOSE\r\n\r\n");
        assert!(mixed_case.connection_close());

        // HTTP/1.1 defaults to keep-alive when the header is absent
        let absent = response_from(b"HTTP/1.1 200 OK\r\nServer: x\r\n\r\n");
        assert!(!absent.connection_close());

        let empty = Response::new();
        assert!(empty.connection_close());

        let headless = response_from(b"HTTP/1.1 200 OK\r\nServer: x");
        assert!(headless.connection_close());
    }

    #[test]
    fn reset_clears_everything() {
        let mut resp = response_from(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
        resp.time_to_first_byte = Duration::from_millis(5);
        resp.status_code().unwrap();

        resp.reset();
        assert!(resp.raw.is_empty());
        assert_eq!(resp.time_to_first_byte, Duration::ZERO);
        assert!(!resp.parsed);
    }
}
