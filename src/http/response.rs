use crate::http::headers::Headers;
use crate::http::request::{keep_alive_for, Version};

/// HTTP status codes supported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 100 Continue
    Continue,
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 204 No Content
    NoContent,
    /// 304 Not Modified
    NotModified,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 408 Request Timeout
    RequestTimeout,
    /// 413 Payload Too Large
    PayloadTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
    /// 503 Service Unavailable
    ServiceUnavailable,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use tether::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue => 100,
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::RequestTimeout => 408,
            StatusCode::PayloadTooLarge => 413,
            StatusCode::InternalServerError => 500,
            StatusCode::ServiceUnavailable => 503,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Continue => "Continue",
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::PayloadTooLarge => "Payload Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    /// 1xx, 204 and 304 responses never carry a body.
    pub fn allows_body(&self) -> bool {
        let code = self.as_u16();
        !(100..200).contains(&code) && code != 204 && code != 304
    }
}

/// Represents a complete HTTP response ready to be sent to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub version: Version,
    /// Headers in the order they will be written
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```
/// # use tether::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// assert_eq!(response.headers.get("Content-Length"), Some("2"));
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    version: Version,
    headers: Headers,
    body: Vec<u8>,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::Http11,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Builds the final Response.
    ///
    /// Adds a Content-Length header based on body size if not already present
    /// and the status permits a body.
    pub fn build(mut self) -> Response {
        if self.status.allows_body() && !self.headers.contains("Content-Length") {
            self.headers
                .append("Content-Length", self.body.len().to_string());
        }

        Response {
            status: self.status,
            version: self.version,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        ResponseBuilder::new(StatusCode::Ok)
            .body(body.into())
            .build()
    }

    /// Creates a 404 Not Found response.
    pub fn not_found() -> Self {
        ResponseBuilder::new(StatusCode::NotFound)
            .body(b"404 Not Found".to_vec())
            .build()
    }

    /// Creates a 500 Internal Server Error response.
    pub fn internal_error() -> Self {
        ResponseBuilder::new(StatusCode::InternalServerError)
            .body(b"500 Internal Server Error".to_vec())
            .build()
    }

    /// Whether the `Connection` semantics of this response let the
    /// connection carry another exchange.
    pub fn keep_alive(&self) -> bool {
        keep_alive_for(self.version, &self.headers)
    }

    /// Rewrites the `Connection` header so that [`keep_alive`](Self::keep_alive)
    /// returns `keep`.
    ///
    /// HTTP/1.1 persists by default, so only `close` is ever written there.
    /// HTTP/1.0 closes by default, so only `keep-alive` is written there.
    pub fn set_keep_alive(&mut self, keep: bool) {
        self.headers.remove("Connection");
        match (self.version, keep) {
            (Version::Http11, false) => self.headers.append("Connection", "close"),
            (Version::Http10, true) => self.headers.append("Connection", "keep-alive"),
            _ => {}
        }
    }

    /// Whether the client can only find the end of this response by the
    /// connection closing.
    ///
    /// True for responses that are not keep-alive, and for responses whose
    /// status allows a body but that declare neither a `Content-Length` nor
    /// a chunked `Transfer-Encoding`.
    pub fn need_eof(&self) -> bool {
        if !self.keep_alive() {
            return true;
        }
        self.status.allows_body()
            && !self.headers.contains("Content-Length")
            && !self.is_chunked()
    }

    fn is_chunked(&self) -> bool {
        self.version == Version::Http11 && self.headers.has_token("Transfer-Encoding", "chunked")
    }

    /// Makes the framing headers agree with the body.
    ///
    /// Bodies are always sent whole, so a chunked coding set by a handler is
    /// replaced with an exact `Content-Length`. Statuses that forbid a body
    /// have it dropped along with any length header.
    pub fn prepare_payload(&mut self) {
        self.headers.remove("Transfer-Encoding");
        if self.status.allows_body() {
            self.headers
                .set("Content-Length", self.body.len().to_string());
        } else {
            self.headers.remove("Content-Length");
            self.body.clear();
        }
    }
}
