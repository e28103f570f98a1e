//! The request handler seam.
//!
//! A handler turns one parsed request into one response. It is called
//! synchronously from the session's point of view and must always produce
//! a response: failures are expressed as error statuses, not as panics.

use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

pub const SERVER_NAME: &str = concat!("tether/", env!("CARGO_PKG_VERSION"));

pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> Response;
}

impl<F> Handler for F
where
    F: Fn(Request) -> Response + Send + Sync + 'static,
{
    fn handle(&self, request: Request) -> Response {
        self(request)
    }
}

/// Answers every request with a small JSON greeting.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelloWorld;

impl HelloWorld {
    pub const BODY: &'static str = r#"{"message":"Hello, World"}"#;
}

impl Handler for HelloWorld {
    fn handle(&self, request: Request) -> Response {
        let mut response = ResponseBuilder::new(StatusCode::Ok)
            .version(request.version)
            .header("Server", SERVER_NAME)
            .header("Content-Type", "application/json")
            .body(Self::BODY.as_bytes().to_vec())
            .build();
        response.set_keep_alive(request.keep_alive());
        response.prepare_payload();
        response
    }
}
