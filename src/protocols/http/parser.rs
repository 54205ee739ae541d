//! HTTP/1.1 request parser and response encoder.
//!
//! Requests are framed as:
//!
//! ```text
//! METHOD SP PATH SP VERSION CRLF
//! *(NAME ":" VALUE CRLF)
//! CRLF
//! [body of exactly Content-Length bytes]
//! ```
//!
//! Header names are stored lowercase; a repeated header replaces the
//! earlier value. Chunked request bodies are rejected.

use bytes::{Bytes, BytesMut};

/// Largest accepted request head (request line plus headers).
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Largest accepted request body.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Ordered header list with case-insensitive lookups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let index = self
            .entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))?;
        Some(self.entries.remove(index).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A fully framed HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// True when the client asked for the connection to be closed.
    pub fn wants_close(&self) -> bool {
        self.header("connection")
            .is_some_and(|value| value.eq_ignore_ascii_case("close"))
    }
}

/// An HTTP response ready to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// A `text/plain` response.
    pub fn text(status: u16, body: impl Into<Bytes>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain")
            .with_body(body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize the response.
    ///
    /// With `chunked` set the body goes out as a single chunk followed by the
    /// terminating zero-length chunk, and `Transfer-Encoding: chunked`
    /// replaces `Content-Length`. Otherwise `Content-Length` is added unless
    /// the response already carries a length or a transfer coding.
    pub fn encode(&self, chunked: bool) -> BytesMut {
        let mut headers = self.headers.clone();
        if chunked {
            headers.remove("content-length");
            if !headers.contains("transfer-encoding") {
                headers.insert("Transfer-Encoding", "chunked");
            }
        } else if !headers.contains("content-length") && !headers.contains("transfer-encoding") {
            headers.insert("Content-Length", self.body.len().to_string());
        }

        let mut buf = BytesMut::with_capacity(128 + self.body.len());
        buf.extend_from_slice(b"HTTP/1.1 ");
        buf.extend_from_slice(self.status.to_string().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(reason_phrase(self.status).as_bytes());
        buf.extend_from_slice(b"\r\n");

        for (name, value) in headers.iter() {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");

        if chunked {
            if !self.body.is_empty() {
                buf.extend_from_slice(format!("{:x}\r\n", self.body.len()).as_bytes());
                buf.extend_from_slice(&self.body);
                buf.extend_from_slice(b"\r\n");
            }
            buf.extend_from_slice(b"0\r\n\r\n");
        } else {
            buf.extend_from_slice(&self.body);
        }

        buf
    }
}

/// Reason phrase for a status code.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Payload Too Large",
        416 => "Range Not Satisfiable",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// Request framing errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request line is not `METHOD PATH VERSION`
    InvalidRequestLine(String),
    /// Content-Length is not a non-negative integer
    InvalidContentLength(String),
    /// Request used a transfer coding we do not decode
    UnsupportedTransferEncoding(String),
    /// Request head exceeded [`MAX_HEAD_SIZE`]
    HeadTooLarge,
    /// Declared body exceeded [`MAX_BODY_SIZE`]
    BodyTooLarge(usize),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidRequestLine(line) => write!(f, "Invalid request line: {:?}", line),
            ParseError::InvalidContentLength(value) => {
                write!(f, "Invalid Content-Length: {:?}", value)
            }
            ParseError::UnsupportedTransferEncoding(value) => {
                write!(f, "Unsupported Transfer-Encoding: {:?}", value)
            }
            ParseError::HeadTooLarge => write!(f, "Request head too large"),
            ParseError::BodyTooLarge(len) => write!(f, "Request body too large: {} bytes", len),
        }
    }
}

impl std::error::Error for ParseError {}

/// Result of parsing a request
#[derive(Debug)]
pub enum ParseResult {
    /// A complete request and the number of bytes it occupied
    Complete(Request, usize),
    /// Need more data
    Incomplete,
    /// Framing error
    Error(ParseError),
}

/// Parse one request from the front of `buffer`.
pub fn parse_request(buffer: &[u8]) -> ParseResult {
    let head_end = match find(buffer, b"\r\n\r\n") {
        Some(pos) => pos,
        None => {
            // Reject a bad request line as soon as it is complete.
            if let Some(line_end) = find(buffer, b"\r\n") {
                if let Err(e) = parse_request_line(&latin1(&buffer[..line_end])) {
                    return ParseResult::Error(e);
                }
            }
            if buffer.len() > MAX_HEAD_SIZE {
                return ParseResult::Error(ParseError::HeadTooLarge);
            }
            return ParseResult::Incomplete;
        }
    };

    if head_end > MAX_HEAD_SIZE {
        return ParseResult::Error(ParseError::HeadTooLarge);
    }

    let head = latin1(&buffer[..head_end]);
    let mut lines = head.split("\r\n");
    let (method, path, version) = match parse_request_line(lines.next().unwrap_or_default()) {
        Ok(parts) => parts,
        Err(e) => return ParseResult::Error(e),
    };

    let mut headers = Headers::new();
    for line in lines {
        // Lines without a colon carry no header and are skipped.
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim());
        }
    }

    if let Some(coding) = headers.get("transfer-encoding") {
        if !coding.eq_ignore_ascii_case("identity") {
            return ParseResult::Error(ParseError::UnsupportedTransferEncoding(
                coding.to_string(),
            ));
        }
    }

    let content_length = match headers.get("content-length") {
        None => 0,
        Some(value) => match value.parse::<usize>() {
            Ok(len) => len,
            Err(_) => {
                return ParseResult::Error(ParseError::InvalidContentLength(value.to_string()))
            }
        },
    };
    if content_length > MAX_BODY_SIZE {
        return ParseResult::Error(ParseError::BodyTooLarge(content_length));
    }

    let body_start = head_end + 4;
    let total = body_start + content_length;
    if buffer.len() < total {
        return ParseResult::Incomplete;
    }

    let request = Request {
        method,
        path,
        version,
        headers,
        body: Bytes::copy_from_slice(&buffer[body_start..total]),
    };
    ParseResult::Complete(request, total)
}

fn parse_request_line(line: &str) -> Result<(String, String, String), ParseError> {
    let mut parts = line.split(' ');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), Some(version), None)
            if !method.is_empty() && !path.is_empty() && !version.is_empty() =>
        {
            Ok((method.to_string(), path.to_string(), version.to_string()))
        }
        _ => Err(ParseError::InvalidRequestLine(line.to_string())),
    }
}

/// Decode bytes as ISO-8859-1, which maps every byte to a char.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
