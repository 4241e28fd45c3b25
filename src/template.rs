//! Line-ending normalization and `||TOKEN||` variable expansion.
//!
//! Every mutable region of a parsed request (method, path, version, body,
//! header keys and values) goes through the same two passes: CRLF
//! canonicalization, then literal token replacement. The body is always
//! expanded first so a `||CLEN||` in a header sees the final body length.

use percent_encoding::percent_decode;

use crate::request::Request;

/// Which template pass `Client::send` applies before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    /// Normalize line endings in every region, then expand variables.
    #[default]
    Full,
    /// Expand variables only, leaving authored line endings untouched.
    Variables,
}

impl Transform {
    pub(crate) fn apply(&self, req: &mut Request) {
        match self {
            Transform::Full => prepare(req),
            Transform::Variables => prepare_variables(req),
        }
    }
}

/// Full preparation pass: canonicalize line endings in every mutable
/// region, then expand variables.
pub fn prepare(req: &mut Request) {
    req.method = normalize_line_endings(&req.method);
    req.path = normalize_line_endings(&req.path);
    req.version = normalize_line_endings(&req.version);
    req.body = normalize_line_endings(&req.body);
    for header in &mut req.headers {
        header.key = normalize_line_endings(&header.key);
        header.value = normalize_line_endings(&header.value);
    }
    prepare_variables(req);
}

/// Variable expansion pass.
///
/// The body is processed first: its variables are expanded, then
/// everything from `||END||` onward is discarded, and only then do the
/// request line and headers expand, so their `||CLEN||` reflects the
/// truncated body.
pub fn prepare_variables(req: &mut Request) {
    let vars = Vars::from_request(req);

    let body = expand(&req.body, &vars, req.body.len());
    req.body = match find_subslice(&body, b"||END||") {
        Some(idx) => body[..idx].to_vec(),
        None => body,
    };
    let clen = req.body.len();

    req.method = expand(&req.method, &vars, clen);
    req.path = expand(&req.path, &vars, clen);
    req.version = expand(&req.version, &vars, clen);
    for header in &mut req.headers {
        header.key = expand(&header.key, &vars, clen);
        header.value = expand(&header.value, &vars, clen);
    }
}

/// Replace every `||CLEN||` in an unparsed buffer with the length of the
/// byte section after the first head terminator (`0` when there is none).
/// For callers that patch an authored buffer without building the parsed
/// view.
pub fn content_length_calculation(req: &mut Request) {
    let trimmed = trim_bytes(&req.raw);
    let body_len = match find_subslice(trimmed, b"\r\n\r\n") {
        Some(idx) => trimmed.len() - (idx + 4),
        None => 0,
    };
    req.raw = replace_all(&req.raw, b"||CLEN||", body_len.to_string().as_bytes());
}

/// Canonicalize to CRLF endings: `CRLF -> LF`, then `LF -> CRLF`.
/// Idempotent, and promotes bare-LF buffers to wire format.
pub fn normalize_line_endings(data: &[u8]) -> Vec<u8> {
    let unix = replace_all(data, b"\r\n", b"\n");
    replace_all(&unix, b"\n", b"\r\n")
}

/// URL-derived expansions, captured once per pass.
struct Vars {
    url: String,
    host: String,
    path: String,
    escaped_path: String,
    full_path: String,
}

impl Vars {
    fn from_request(req: &Request) -> Self {
        let (host, path, escaped_path) = match &req.uri {
            Some(uri) => {
                let escaped = uri.path().to_string();
                let mut decoded = percent_decode(escaped.as_bytes())
                    .decode_utf8_lossy()
                    .into_owned();
                if decoded.is_empty() {
                    decoded.push('/');
                }
                (
                    uri.host_str().unwrap_or_default().to_string(),
                    decoded,
                    escaped,
                )
            }
            None => (String::new(), String::from("/"), String::new()),
        };
        Vars {
            url: req.url.clone(),
            host,
            path,
            escaped_path,
            full_path: req.full_path(),
        }
    }
}

fn expand(data: &[u8], vars: &Vars, body_len: usize) -> Vec<u8> {
    let mut out = replace_all(data, b"||CR||", b"\r");
    out = replace_all(&out, b"||LF||", b"\n");
    out = replace_all(&out, b"||ABSURL||", vars.url.as_bytes());
    out = replace_all(&out, b"||HOST||", vars.host.as_bytes());
    out = replace_all(&out, b"||PATH||", vars.path.as_bytes());
    out = replace_all(&out, b"||ESCAPEDPATH||", vars.escaped_path.as_bytes());
    out = replace_all(&out, b"||FULLPATH||", vars.full_path.as_bytes());
    replace_all(&out, b"||CLEN||", body_len.to_string().as_bytes())
}

/// Find the first occurrence of `needle` in `haystack`.
pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Replace every occurrence of `from` with `to`.
pub(crate) fn replace_all(data: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    while let Some(idx) = find_subslice(rest, from) {
        out.extend_from_slice(&rest[..idx]);
        out.extend_from_slice(to);
        rest = &rest[idx + from.len()..];
    }
    out.extend_from_slice(rest);
    out
}

/// Split on CRLF boundaries; the separators are not included.
pub(crate) fn split_crlf(data: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut rest = data;
    while let Some(idx) = find_subslice(rest, b"\r\n") {
        out.push(&rest[..idx]);
        rest = &rest[idx + 2..];
    }
    out.push(rest);
    out
}

/// Trim ASCII whitespace from both ends.
pub(crate) fn trim_bytes(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let end = data
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |idx| idx + 1);
    &data[start..end]
}
