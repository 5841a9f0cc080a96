use std::str;

use thiserror::Error;

use super::headers::Headers;
use super::request::Request;
use super::status::StatusCode;

/// Largest request head accepted before the terminator shows up.
pub const MAX_HEAD_BYTES: usize = 32 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),
    #[error("request head is not valid UTF-8")]
    InvalidUtf8,
    #[error("malformed request line: {0:?}")]
    RequestLine(String),
    #[error("malformed header line: {0:?}")]
    HeaderLine(String),
    #[error("invalid Content-Length: {0:?}")]
    ContentLength(String),
}

impl ParseError {
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::HeadTooLarge(_) => StatusCode::HeaderFieldsTooLarge,
            _ => StatusCode::BadRequest,
        }
    }
}

/// What is known about a request once its head is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Head {
    /// Bytes up to and including the blank line.
    pub len: usize,
    pub content_length: Option<usize>,
    pub host: Option<String>,
}

impl Head {
    /// Total bytes of the request: head plus declared body.
    /// [`parse_head`] refuses lengths that would not fit.
    pub fn frame_len(&self) -> usize {
        self.len.saturating_add(self.content_length.unwrap_or(0))
    }
}

/// Looks for a complete head at the start of `buf`. `Ok(None)` means more
/// bytes are needed.
pub fn parse_head(buf: &[u8]) -> Result<Option<Head>, ParseError> {
    let len = match twoway::find_bytes(buf, b"\r\n\r\n") {
        Some(idx) => idx + 4,
        None if buf.len() > MAX_HEAD_BYTES => return Err(ParseError::HeadTooLarge(MAX_HEAD_BYTES)),
        None => return Ok(None),
    };
    if len > MAX_HEAD_BYTES {
        return Err(ParseError::HeadTooLarge(MAX_HEAD_BYTES));
    }

    let text = str::from_utf8(&buf[..len]).map_err(|_| ParseError::InvalidUtf8)?;
    let mut content_length = None;
    let mut host = None;
    for line in text.split("\r\n").skip(1).filter(|l| !l.is_empty()) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("Content-Length") {
            let n = value
                .parse::<usize>()
                .ok()
                .filter(|n| len.checked_add(*n).is_some())
                .ok_or_else(|| ParseError::ContentLength(value.to_string()))?;
            content_length = Some(n);
        } else if name.eq_ignore_ascii_case("Host") {
            host = Some(value.to_string());
        }
    }

    Ok(Some(Head {
        len,
        content_length,
        host,
    }))
}

/// Parses one complete frame as extracted by the connection buffer.
pub fn parse_request(frame: &[u8]) -> Result<Request, ParseError> {
    let head = parse_head(frame)?.ok_or_else(|| ParseError::RequestLine(String::new()))?;
    let text = str::from_utf8(&frame[..head.len]).map_err(|_| ParseError::InvalidUtf8)?;

    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or("");
    let mut req = parse_request_line(request_line)?;

    for line in lines.filter(|l| !l.is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::HeaderLine(line.to_string()))?;
        let name = name.trim_end_matches([' ', '\t']);
        if name.is_empty() {
            return Err(ParseError::HeaderLine(line.to_string()));
        }
        req.headers.insert(name, value.trim_matches([' ', '\t']));
    }

    let end = head.frame_len().min(frame.len());
    req.body = frame[head.len..end].to_vec();
    Ok(req)
}

fn parse_request_line(line: &str) -> Result<Request, ParseError> {
    let bad = || ParseError::RequestLine(line.to_string());

    let (method, rest) = line.split_once(' ').ok_or_else(bad)?;
    let (target, version) = rest.split_once(' ').ok_or_else(bad)?;
    let version = version.trim();
    if method.is_empty() || target.is_empty() || version.is_empty() {
        return Err(bad());
    }

    let (uri, query_string) = match target.split_once('?') {
        Some((p, q)) => (p, q),
        None => (target, ""),
    };

    Ok(Request {
        method: method.to_string(),
        uri: uri.to_string(),
        query_string: query_string.to_string(),
        version: version.to_string(),
        headers: Headers::new(),
        body: Vec::new(),
    })
}
