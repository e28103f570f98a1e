use bytes::{Buf, BytesMut};

use crate::config::Limits;
use crate::http::headers::Headers;
use crate::http::request::{Method, Request, Version};

/// Longest chunk-size or trailer line accepted, extensions included.
const MAX_CHUNK_LINE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,
    #[error("unknown method")]
    InvalidMethod,
    #[error("unsupported protocol version")]
    InvalidVersion,
    #[error("malformed header field")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("unsupported Transfer-Encoding")]
    UnsupportedTransferEncoding,
    #[error("malformed chunked body")]
    InvalidChunk,
    #[error("header section larger than {0} bytes")]
    HeadersTooLarge(usize),
    #[error("body larger than {0} bytes")]
    BodyTooLarge(usize),
    /// Not an error on its own: the buffer holds a prefix of a request and
    /// more bytes must be read.
    #[error("incomplete request")]
    Incomplete,
}

/// How the body of a request is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Length(usize),
    Chunked,
}

/// Parses one request from the front of `buf`.
///
/// On success returns the request and the number of bytes it occupied.
/// Anything past that belongs to the next request on the connection.
pub fn parse_http_request(buf: &[u8], limits: &Limits) -> Result<(Request, usize), ParseError> {
    let (mut request, framing, head_len) = parse_head(buf, limits)?;

    let mut decoder = BodyDecoder::new(framing, limits);
    let used = decoder.decode(&buf[head_len..])?;
    if !decoder.is_done() {
        return Err(ParseError::Incomplete);
    }

    request.body = decoder.into_body();
    Ok((request, head_len + used))
}

/// Parses requests off a connection buffer as bytes trickle in.
///
/// The head is re-scanned until it is complete, which the header limit
/// keeps cheap. Body bytes are decoded once and drained from the buffer
/// as they arrive, so a slow or finely chunked body costs linear time.
pub struct RequestParser {
    limits: Limits,
    pending: Option<(Request, BodyDecoder)>,
}

impl RequestParser {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            pending: None,
        }
    }

    /// True between messages, when no head has been parsed yet.
    pub fn is_idle(&self) -> bool {
        self.pending.is_none()
    }

    /// Consumes what it can from the front of `buf`.
    ///
    /// Returns `Ok(None)` while the request is still incomplete.
    pub fn parse(&mut self, buf: &mut BytesMut) -> Result<Option<Request>, ParseError> {
        let (mut request, mut decoder) = match self.pending.take() {
            Some(pending) => pending,
            None => match parse_head(&buf[..], &self.limits) {
                Ok((request, framing, head_len)) => {
                    buf.advance(head_len);
                    (request, BodyDecoder::new(framing, &self.limits))
                }
                Err(ParseError::Incomplete) => return Ok(None),
                Err(e) => return Err(e),
            },
        };

        let used = decoder.decode(&buf[..])?;
        buf.advance(used);

        if decoder.is_done() {
            request.body = decoder.into_body();
            Ok(Some(request))
        } else {
            self.pending = Some((request, decoder));
            Ok(None)
        }
    }
}

/// Length of the blank lines (CRLF or bare LF) that may precede a request
/// line.
pub(crate) fn leading_newlines(buf: &[u8]) -> usize {
    let mut pos = 0;
    loop {
        if buf[pos..].starts_with(b"\r\n") {
            pos += 2;
        } else if buf[pos..].starts_with(b"\n") {
            pos += 1;
        } else {
            return pos;
        }
    }
}

/// Parses the request line and headers. The returned request has an empty
/// body; the length is the number of bytes up to and including the blank
/// line that ends the head.
fn parse_head(buf: &[u8], limits: &Limits) -> Result<(Request, Framing, usize), ParseError> {
    // Blank lines before the request line count toward the header limit.
    let start = leading_newlines(buf);
    let buf_rest = &buf[start..];

    let headers_end = match find_headers_end(buf_rest) {
        Some(pos) => pos,
        None if buf.len() > limits.max_header_bytes => {
            return Err(ParseError::HeadersTooLarge(limits.max_header_bytes));
        }
        None => return Err(ParseError::Incomplete),
    };
    let head_len = start + headers_end + 4;
    if head_len > limits.max_header_bytes {
        return Err(ParseError::HeadersTooLarge(limits.max_header_bytes));
    }

    let headers_str = std::str::from_utf8(&buf_rest[..headers_end])
        .map_err(|_| ParseError::InvalidRequest)?;
    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split(' ');
    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().filter(|p| !p.is_empty()).ok_or(ParseError::InvalidRequest)?;
    let version_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;
    let version = Version::from_str(version_str).ok_or(ParseError::InvalidVersion)?;

    // Headers
    let mut headers = Headers::new();
    for line in lines {
        if line.starts_with(' ') || line.starts_with('\t') {
            // obs-fold continuation lines are not accepted
            return Err(ParseError::InvalidHeader);
        }

        let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        if key.is_empty() || key.bytes().any(|b| b.is_ascii_whitespace()) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    let framing = if headers.contains("Transfer-Encoding") {
        if headers.contains("Content-Length") {
            return Err(ParseError::InvalidContentLength);
        }
        if !is_chunked_only(&headers) {
            return Err(ParseError::UnsupportedTransferEncoding);
        }
        Framing::Chunked
    } else {
        let content_length = content_length(&headers)?.unwrap_or(0);
        if content_length > limits.max_body_bytes {
            return Err(ParseError::BodyTooLarge(limits.max_body_bytes));
        }
        Framing::Length(content_length)
    };

    let request = Request {
        method,
        path: path.to_string(),
        version,
        headers,
        body: Vec::new(),
    };

    Ok((request, framing, head_len))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Every Content-Length value must agree. Returns `None` when absent.
fn content_length(headers: &Headers) -> Result<Option<usize>, ParseError> {
    let mut found: Option<usize> = None;

    for value in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidContentLength);
        }
        let n: usize = value.parse().map_err(|_| ParseError::InvalidContentLength)?;
        match found {
            Some(prev) if prev != n => return Err(ParseError::InvalidContentLength),
            _ => found = Some(n),
        }
    }

    Ok(found)
}

fn is_chunked_only(headers: &Headers) -> bool {
    let mut codings = headers
        .get_all("Transfer-Encoding")
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|c| !c.is_empty());

    matches!(codings.next(), Some(c) if c.eq_ignore_ascii_case("chunked")) && codings.next().is_none()
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Length(usize),
    ChunkSize,
    ChunkData(usize),
    ChunkDataEnd,
    Trailer,
    Done,
}

/// Incremental body decoder. Each call consumes only the bytes it can use,
/// so nothing is decoded twice.
pub struct BodyDecoder {
    state: DecodeState,
    body: Vec<u8>,
    max_body: usize,
    max_trailer: usize,
    trailer_bytes: usize,
}

impl BodyDecoder {
    pub fn new(framing: Framing, limits: &Limits) -> Self {
        let state = match framing {
            Framing::Length(n) => DecodeState::Length(n),
            Framing::Chunked => DecodeState::ChunkSize,
        };

        Self {
            state,
            body: Vec::new(),
            max_body: limits.max_body_bytes,
            max_trailer: limits.max_header_bytes,
            trailer_bytes: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, DecodeState::Done)
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Feeds the front of `buf` to the decoder and returns how many bytes
    /// were consumed. Trailer fields are discarded.
    pub fn decode(&mut self, buf: &[u8]) -> Result<usize, ParseError> {
        let mut pos = 0;

        loop {
            match self.state {
                DecodeState::Done => return Ok(pos),

                DecodeState::Length(remaining) => {
                    let take = remaining.min(buf.len() - pos);
                    self.body.extend_from_slice(&buf[pos..pos + take]);
                    pos += take;
                    if take < remaining {
                        self.state = DecodeState::Length(remaining - take);
                        return Ok(pos);
                    }
                    self.state = DecodeState::Done;
                }

                DecodeState::ChunkSize => {
                    let Some(line_end) = find_line(&buf[pos..])? else {
                        return Ok(pos);
                    };
                    let line = std::str::from_utf8(&buf[pos..pos + line_end])
                        .map_err(|_| ParseError::InvalidChunk)?;
                    let size_str = line.split(';').next().unwrap_or("").trim();
                    if size_str.is_empty() {
                        return Err(ParseError::InvalidChunk);
                    }
                    let size = usize::from_str_radix(size_str, 16)
                        .map_err(|_| ParseError::InvalidChunk)?;
                    pos += line_end + 2;

                    if size == 0 {
                        self.state = DecodeState::Trailer;
                    } else if self.body.len().saturating_add(size) > self.max_body {
                        return Err(ParseError::BodyTooLarge(self.max_body));
                    } else {
                        self.body.reserve(size);
                        self.state = DecodeState::ChunkData(size);
                    }
                }

                DecodeState::ChunkData(remaining) => {
                    let take = remaining.min(buf.len() - pos);
                    self.body.extend_from_slice(&buf[pos..pos + take]);
                    pos += take;
                    if take < remaining {
                        self.state = DecodeState::ChunkData(remaining - take);
                        return Ok(pos);
                    }
                    self.state = DecodeState::ChunkDataEnd;
                }

                DecodeState::ChunkDataEnd => {
                    if buf.len() - pos < 2 {
                        return Ok(pos);
                    }
                    if &buf[pos..pos + 2] != b"\r\n" {
                        return Err(ParseError::InvalidChunk);
                    }
                    pos += 2;
                    self.state = DecodeState::ChunkSize;
                }

                DecodeState::Trailer => {
                    let Some(line_end) = find_line(&buf[pos..])? else {
                        return Ok(pos);
                    };
                    pos += line_end + 2;
                    self.trailer_bytes += line_end + 2;
                    if self.trailer_bytes > self.max_trailer {
                        return Err(ParseError::HeadersTooLarge(self.max_trailer));
                    }
                    if line_end == 0 {
                        self.state = DecodeState::Done;
                    }
                }
            }
        }
    }
}

/// Position of the next CRLF, or `None` if more bytes are needed.
fn find_line(buf: &[u8]) -> Result<Option<usize>, ParseError> {
    match buf.windows(2).position(|w| w == b"\r\n") {
        Some(pos) if pos <= MAX_CHUNK_LINE => Ok(Some(pos)),
        Some(_) => Err(ParseError::InvalidChunk),
        None if buf.len() > MAX_CHUNK_LINE => Err(ParseError::InvalidChunk),
        None => Ok(None),
    }
}
