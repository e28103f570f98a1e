//! HTTP/1.x protocol implementation.
//!
//! # Architecture
//!
//! - **`session`**: the per-connection read-handle-write state machine
//! - **`parser`**: incremental request parsing from a byte buffer
//! - **`headers`**: ordered, case-insensitive header multimap
//! - **`request`** / **`response`**: message types and keep-alive rules
//! - **`writer`**: response serialization and the `send` contract
//! - **`handler`**: the pluggable request handler and a sample handler
//!
//! # Session State Machine
//!
//! ```text
//!        ┌─────────────┐
//!   ┌───▶│   Reading   │ ← parse from buffered + fresh bytes
//!   │    └──────┬──────┘
//!   │           │ request parsed          (clean EOF / idle → Closing)
//!   │           ▼
//!   │    ┌──────────────┐
//!   │    │   Handling   │ ← handler(request) -> response
//!   │    └──────┬───────┘
//!   │           ▼
//!   │    ┌──────────────┐
//!   │    │   Writing    │ ← need_eof decided, response sent
//!   │    └──────┬───────┘
//!   │           ├─ need_eof → Closing → shutdown(write) → Terminated
//!   └───────────┘ keep-alive
//! ```
//!
//! Any read, parse or write error goes straight to Terminated.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether::http::handler::HelloWorld;
//! use tether::http::session::{Session, SessionConfig};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     let handler = Arc::new(HelloWorld);
//!
//!     loop {
//!         let (socket, _addr) = listener.accept().await?;
//!         let session = Session::new(socket, handler.clone(), SessionConfig::default());
//!         tokio::spawn(async move {
//!             if let Err(e) = session.run().await {
//!                 eprintln!("Connection error: {}", e);
//!             }
//!         });
//!     }
//! }
//! ```

pub mod handler;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod session;
pub mod writer;
