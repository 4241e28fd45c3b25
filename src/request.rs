//! Raw request model.
//!
//! A [`Request`] owns the authored byte buffer and, after [`Request::parse`],
//! an addressable view of it: request line, ordered headers, body. The view
//! re-serializes with full fidelity: duplicate headers, original key
//! spelling, and insertion order all survive the round trip.

use std::collections::HashMap;

use rand::Rng;
use url::Url;

use crate::error::{Error, Result};
use crate::template::{self, find_subslice, split_crlf, trim_bytes};

const BASE_TEMPLATE: &str = "GET ||FULLPATH|| HTTP/1.1\nHost: ||HOST||\nConnection: close\nUser-Agent: rh.1.1\nAccept: */*\n\n";

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// One header line from the raw buffer.
///
/// `pos` is the header's line index in the inbound buffer and drives
/// emission order; `key` keeps the original pre-colon spelling.
#[derive(Debug, Clone)]
pub struct HeaderLine {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub pos: usize,
}

/// Mutable holder of an on-wire request.
///
/// Constructed empty ([`Request::new`]), from a URL ([`Request::base`]),
/// or by assigning `raw`/`url` directly. Parsing is deferred: nothing
/// touches the buffer until [`Request::parse`] (or `Client::send`, or a
/// mutator that needs the view) runs.
#[derive(Debug, Clone, Default)]
pub struct Request {
    /// The authored on-wire buffer.
    pub raw: Vec<u8>,
    /// Absolute request URL.
    pub url: String,
    /// Parsed URL; populated by the constructors and by `Client::send`.
    pub uri: Option<Url>,
    /// Optional dotted address overriding DNS for the destination.
    pub ip: Option<String>,

    parsed: bool,
    http_line: Vec<u8>,
    pub(crate) method: Vec<u8>,
    pub(crate) path: Vec<u8>,
    pub(crate) version: Vec<u8>,
    pub(crate) body: Vec<u8>,
    pub(crate) headers: Vec<HeaderLine>,
    index: HashMap<String, usize>,
}

impl Request {
    /// Empty, unparsed request shell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimal GET template for `url`, parsed and fully prepared.
    pub fn base(url: &str) -> Result<Self> {
        Self::from_template(url, BASE_TEMPLATE.as_bytes().to_vec())
    }

    /// Like [`Request::base`], but the request-target is spliced in
    /// verbatim, so authored oddities in `path` survive untouched.
    pub fn raw_path(url: &str, path: &str) -> Result<Self> {
        let raw = template::replace_all(BASE_TEMPLATE.as_bytes(), b"||FULLPATH||", path.as_bytes());
        Self::from_template(url, raw)
    }

    fn from_template(url: &str, raw: Vec<u8>) -> Result<Self> {
        let uri =
            Url::parse(url).map_err(|e| Error::invalid_url(format!("{url}: {e}")))?;
        let mut req = Request {
            raw: template::normalize_line_endings(&raw),
            url: url.to_string(),
            uri: Some(uri),
            ..Default::default()
        };
        req.parse()?;
        template::prepare(&mut req);
        Ok(req)
    }

    /// Whether the parsed view is current.
    pub fn is_parsed(&self) -> bool {
        self.parsed
    }

    /// Build the parsed view from the raw buffer. Idempotent.
    ///
    /// Buffers without any CRLF get their LFs promoted first. The buffer
    /// splits once at the head terminator; the head splits into the
    /// request line (exactly three space-separated pieces) and header
    /// lines. Duplicate header names stay addressable under a
    /// `name_<line-index>` lookup key.
    pub fn parse(&mut self) -> Result<()> {
        if self.parsed {
            return Ok(());
        }
        if find_subslice(&self.raw, b"\r\n").is_none() {
            self.raw = template::normalize_line_endings(&self.raw);
        }

        let (head_end, body_start) = match find_subslice(&self.raw, b"\r\n\r\n") {
            Some(idx) => (idx, idx + 4),
            None => (self.raw.len(), self.raw.len()),
        };
        let body = self.raw[body_start..].to_vec();
        let head = self.raw[..head_end].to_vec();

        let lines = split_crlf(&head);
        let request_line = lines[0];
        self.http_line = request_line.to_vec();
        let pieces: Vec<&[u8]> = request_line
            .split(|&b| b == b' ')
            .map(trim_bytes)
            .filter(|piece| !piece.is_empty())
            .collect();
        if pieces.len() != 3 {
            return Err(Error::invalid_request(format!(
                "invalid HTTP line: {:?}",
                String::from_utf8_lossy(request_line)
            )));
        }

        let mut headers = Vec::with_capacity(lines.len() - 1);
        let mut index = HashMap::with_capacity(lines.len() - 1);
        for (pos, line) in lines[1..].iter().enumerate() {
            let (key, value) = match line.iter().position(|&b| b == b':') {
                Some(colon) => (&line[..colon], trim_bytes(&line[colon + 1..])),
                None => (&line[..], &[][..]),
            };
            let mut lookup = String::from_utf8_lossy(key).to_lowercase();
            if index.contains_key(&lookup) {
                lookup = format!("{lookup}_{pos}");
            }
            headers.push(HeaderLine {
                key: key.to_vec(),
                value: value.to_vec(),
                pos,
            });
            index.insert(lookup, headers.len() - 1);
        }

        self.method = pieces[0].to_vec();
        self.path = pieces[1].to_vec();
        self.version = pieces[2].to_vec();
        self.body = body;
        self.headers = headers;
        self.index = index;
        self.parsed = true;
        Ok(())
    }

    /// Replace the raw buffer and reparse.
    pub fn set_rawdata(&mut self, raw: impl Into<Vec<u8>>) -> Result<()> {
        self.raw = raw.into();
        self.parsed = false;
        self.parse()
    }

    pub fn set_method(&mut self, method: impl Into<Vec<u8>>) {
        self.method = method.into();
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    /// Update the header addressed by `key` (lowercased lookup name), or
    /// append a new one at the end of the emission order.
    pub fn set_header(&mut self, key: &str, name: &[u8], value: &[u8]) {
        if let Some(&idx) = self.index.get(key) {
            self.headers[idx].key = name.to_vec();
            self.headers[idx].value = value.to_vec();
        } else {
            let pos = self.headers.len();
            self.headers.push(HeaderLine {
                key: name.to_vec(),
                value: value.to_vec(),
                pos,
            });
            self.index.insert(key.to_string(), self.headers.len() - 1);
        }
    }

    /// Upsert `Connection: close`.
    pub fn set_connection_close(&mut self) {
        self.set_header("connection", b"Connection", b"close");
    }

    /// Splice `params` into the path before any fragment marker. A `?` or
    /// `&` separator is chosen by whether the path already carries a
    /// query. A fragment loses its `#` and is appended after the params.
    pub fn add_query_params(&mut self, params: &[u8]) {
        let (head, tail) = match self.path.iter().position(|&b| b == b'#') {
            Some(idx) => (&self.path[..idx], Some(&self.path[idx + 1..])),
            None => (&self.path[..], None),
        };
        let mut out = Vec::with_capacity(self.path.len() + params.len() + 1);
        out.extend_from_slice(head);
        out.push(if head.contains(&b'?') { b'&' } else { b'?' });
        out.extend_from_slice(params);
        if let Some(tail) = tail {
            out.extend_from_slice(tail);
        }
        self.path = out;
    }

    /// Append a random `xxxx=xxxx` hex tag to the query string.
    pub fn cache_buster_param(&mut self) {
        let mut rng = rand::thread_rng();
        let mut tag = [0u8; 4];
        for byte in tag.iter_mut() {
            *byte = HEX_DIGITS[rng.gen_range(0..HEX_DIGITS.len())];
        }
        let mut param = Vec::with_capacity(tag.len() * 2 + 1);
        param.extend_from_slice(&tag);
        param.push(b'=');
        param.extend_from_slice(&tag);
        self.add_query_params(&param);
    }

    /// Re-serialize the parsed view: request line, headers in position
    /// order (duplicates included), blank line, body.
    pub fn bytes(&self) -> Vec<u8> {
        let mut ordered: Vec<&HeaderLine> = self.headers.iter().collect();
        ordered.sort_by_key(|header| header.pos);

        let mut buf = Vec::with_capacity(self.raw.len() + 64);
        buf.extend_from_slice(&self.method);
        buf.push(b' ');
        buf.extend_from_slice(&self.path);
        buf.push(b' ');
        buf.extend_from_slice(&self.version);
        buf.extend_from_slice(b"\r\n");
        for header in ordered {
            buf.extend_from_slice(&header.key);
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(&header.value);
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Header record addressed by its lowercased lookup name
    /// (`cookie`, `cookie_2`, ...).
    pub fn header(&self, key: &str) -> Option<&HeaderLine> {
        self.index.get(key).map(|&idx| &self.headers[idx])
    }

    /// The request line as it appeared in the raw buffer.
    pub fn http_line(&self) -> &[u8] {
        &self.http_line
    }

    /// Parsed request-target bytes.
    pub fn parsed_path(&self) -> &[u8] {
        &self.path
    }

    /// Parsed body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// True when the `Connection` header carries the `close` token.
    /// Exact comma-separated token match: `closeconn`, `close-conn` and
    /// `close_conn` do not count.
    pub fn wants_close(&self) -> bool {
        self.connection_has_token(b"close")
    }

    /// True when the `Connection` header carries the `upgrade` token.
    pub fn wants_upgrade(&self) -> bool {
        self.connection_has_token(b"upgrade")
    }

    fn connection_has_token(&self, token: &[u8]) -> bool {
        let Some(header) = self.header("connection") else {
            return false;
        };
        header
            .value
            .split(|&b| b == b',')
            .any(|part| trim_bytes(part).eq_ignore_ascii_case(token))
    }

    /// First space-delimited token of the first raw line. Works on
    /// unparsed (and unparseable) buffers.
    pub fn raw_method(&self) -> String {
        let first_line = self.raw.split(|&b| b == b'\n').next().unwrap_or_default();
        let token = first_line.split(|&b| b == b' ').next().unwrap_or_default();
        String::from_utf8_lossy(token).into_owned()
    }

    /// Dial address: the IP override when set, else the URL hostname.
    pub fn addr(&self, port: u16) -> String {
        match &self.ip {
            Some(ip) => format!("{ip}:{port}"),
            None => {
                let host = self
                    .uri
                    .as_ref()
                    .and_then(|uri| uri.host_str())
                    .unwrap_or_default();
                format!("{host}:{port}")
            }
        }
    }

    /// Request-URI (path plus query) with the `#fragment` appended when
    /// the URL carries one.
    pub fn full_path(&self) -> String {
        let Some(uri) = &self.uri else {
            return String::from("/");
        };
        let mut out = String::from(uri.path());
        if out.is_empty() {
            out.push('/');
        }
        if let Some(query) = uri.query() {
            out.push('?');
            out.push_str(query);
        }
        if let Some(fragment) = uri.fragment() {
            out.push('#');
            out.push_str(fragment);
        }
        out
    }
}
