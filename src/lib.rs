//! Tether - minimal HTTP/1.x server
//!
//! Accepts TCP connections, runs one keep-alive aware session per
//! connection and dispatches each request to a pluggable handler.

pub mod config;
pub mod error;
pub mod http;
pub mod server;
