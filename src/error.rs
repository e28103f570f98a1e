//! Error taxonomy for the server core.
//!
//! Session errors end one connection only. Server errors end the accept
//! loop and, from `main`, the process.

use std::net::SocketAddr;

use crate::http::parser::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),

    #[error("peer closed the connection mid-request ({buffered} bytes buffered)")]
    UnexpectedEof { buffered: usize },

    #[error("timed out waiting for the rest of a request")]
    Timeout,

    #[error("request handler panicked")]
    HandlerPanicked,

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("listener failed: {0}")]
    Accept(#[source] std::io::Error),
}
