#![allow(dead_code)]

use tokio::io::{AsyncRead, AsyncReadExt};

/// A response as it came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub head: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn status_line(&self) -> &str {
        self.head.lines().next().unwrap_or("")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }
}

/// Reads Content-Length framed responses one at a time.
pub struct ResponseReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ResponseReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, buf: Vec::new() }
    }

    /// Next response, or `None` if the server closed cleanly first.
    pub async fn next(&mut self) -> Option<RawResponse> {
        let head_end = loop {
            if let Some(pos) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
            if !self.fill().await {
                assert!(self.buf.is_empty(), "connection closed mid-response");
                return None;
            }
        };

        let head = String::from_utf8(self.buf[..head_end].to_vec()).unwrap();
        self.buf.drain(..head_end + 4);

        let mut response = RawResponse { head, body: Vec::new() };
        let length: usize = response
            .header("Content-Length")
            .map(|v| v.parse().unwrap())
            .unwrap_or(0);

        while self.buf.len() < length {
            assert!(self.fill().await, "connection closed mid-body");
        }
        response.body = self.buf.drain(..length).collect();
        Some(response)
    }

    async fn fill(&mut self) -> bool {
        let mut chunk = [0u8; 1024];
        let n = self.inner.read(&mut chunk).await.unwrap_or(0);
        self.buf.extend_from_slice(&chunk[..n]);
        n > 0
    }
}
