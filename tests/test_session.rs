mod common;

use std::sync::Arc;
use std::time::Duration;

use common::ResponseReader;
use tether::config::Limits;
use tether::error::SessionError;
use tether::http::handler::{Handler, HelloWorld};
use tether::http::parser::ParseError;
use tether::http::request::Request;
use tether::http::response::{Response, ResponseBuilder, StatusCode};
use tether::http::session::{Session, SessionConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

fn start(handler: Arc<dyn Handler>, config: SessionConfig) -> (DuplexStream, JoinHandle<Result<(), SessionError>>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let session = Session::new(server, handler, config);
    (client, tokio::spawn(session.run()))
}

fn hello() -> Arc<dyn Handler> {
    Arc::new(HelloWorld)
}

/// Echoes the request path back as a plain-text body.
fn echo_path() -> Arc<dyn Handler> {
    Arc::new(|req: Request| -> Response {
        let mut response = ResponseBuilder::new(StatusCode::Ok)
            .version(req.version)
            .header("Content-Type", "text/plain")
            .body(req.path.clone().into_bytes())
            .build();
        response.set_keep_alive(req.keep_alive());
        response
    })
}

#[tokio::test]
async fn test_keep_alive_serves_second_request() {
    let (client, session) = start(hello(), SessionConfig::default());
    let (rd, mut wr) = tokio::io::split(client);
    let mut responses = ResponseReader::new(rd);

    wr.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let first = responses.next().await.unwrap();
    assert_eq!(first.status_line(), "HTTP/1.1 200 OK");
    assert_eq!(first.body, HelloWorld::BODY.as_bytes());
    assert_eq!(first.header("Connection"), None);

    wr.write_all(b"GET /again HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
        .await
        .unwrap();
    let second = responses.next().await.unwrap();
    assert_eq!(second.status_line(), "HTTP/1.1 200 OK");

    wr.shutdown().await.unwrap();
    assert!(responses.next().await.is_none());
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connection_close_answers_once_then_shuts_down() {
    let handler: Arc<dyn Handler> = Arc::new(|req: Request| -> Response {
        let mut response = ResponseBuilder::new(StatusCode::Ok)
            .body(b"Hello, World".to_vec())
            .build();
        response.set_keep_alive(req.keep_alive());
        response
    });
    let (mut client, session) = start(handler, SessionConfig::default());

    // The pipelined second request must never be answered.
    client
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\nGET /ignored HTTP/1.1\r\n\r\n")
        .await
        .unwrap();

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();
    assert_eq!(
        String::from_utf8(wire).unwrap(),
        "HTTP/1.1 200 OK\r\nContent-Length: 12\r\nConnection: close\r\n\r\nHello, World"
    );

    drop(client);
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_http10_without_keep_alive_closes() {
    let (client, session) = start(hello(), SessionConfig::default());
    let (rd, mut wr) = tokio::io::split(client);
    let mut responses = ResponseReader::new(rd);

    wr.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();

    let response = responses.next().await.unwrap();
    assert_eq!(response.status_line(), "HTTP/1.0 200 OK");
    assert!(responses.next().await.is_none());

    drop((responses, wr));
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_http10_with_keep_alive_persists() {
    let (client, session) = start(hello(), SessionConfig::default());
    let (rd, mut wr) = tokio::io::split(client);
    let mut responses = ResponseReader::new(rd);

    for _ in 0..2 {
        wr.write_all(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").await.unwrap();
        let response = responses.next().await.unwrap();
        assert_eq!(response.header("Connection"), Some("keep-alive"));
    }

    wr.shutdown().await.unwrap();
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_clean_eof_without_bytes_is_not_an_error() {
    let (client, session) = start(hello(), SessionConfig::default());

    drop(client);

    assert!(session.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_eof_mid_request_fails_without_writing() {
    let (mut client, session) = start(hello(), SessionConfig::default());

    client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    let result = session.await.unwrap();
    assert!(matches!(result, Err(SessionError::UnexpectedEof { buffered }) if buffered > 0));

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();
    assert!(wire.is_empty());
}

#[tokio::test]
async fn test_malformed_request_fails_without_response() {
    let (mut client, session) = start(hello(), SessionConfig::default());

    client.write_all(b"BREW /pot HTTP/1.1\r\n\r\n").await.unwrap();

    let result = session.await.unwrap();
    assert!(matches!(result, Err(SessionError::Parse(ParseError::InvalidMethod))));

    let mut wire = Vec::new();
    client.read_to_end(&mut wire).await.unwrap();
    assert!(wire.is_empty());
}

#[tokio::test]
async fn test_oversized_body_ends_session() {
    let config = SessionConfig {
        limits: Limits { max_header_bytes: 1024, max_body_bytes: 8 },
        idle_timeout: None,
    };
    let (mut client, session) = start(hello(), config);

    client
        .write_all(b"POST / HTTP/1.1\r\nContent-Length: 9\r\n\r\n123456789")
        .await
        .unwrap();

    let result = session.await.unwrap();
    assert!(matches!(result, Err(SessionError::Parse(ParseError::BodyTooLarge(8)))));
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let (client, session) = start(echo_path(), SessionConfig::default());
    let (rd, mut wr) = tokio::io::split(client);
    let mut responses = ResponseReader::new(rd);

    wr.write_all(b"GET /one HTTP/1.1\r\n\r\nGET /two HTTP/1.1\r\n\r\nGET /three HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let bodies: Vec<Vec<u8>> = vec![
        responses.next().await.unwrap().body,
        responses.next().await.unwrap().body,
        responses.next().await.unwrap().body,
    ];
    assert_eq!(bodies, vec![b"/one".to_vec(), b"/two".to_vec(), b"/three".to_vec()]);
    assert!(responses.next().await.is_none());

    drop((responses, wr));
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_request_split_across_writes() {
    let handler: Arc<dyn Handler> = Arc::new(|req: Request| Response::ok(req.body));
    let (client, session) = start(handler, SessionConfig::default());
    let (rd, mut wr) = tokio::io::split(client);
    let mut responses = ResponseReader::new(rd);

    wr.write_all(b"POST /data HTTP/1.1\r\nContent-Le").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    wr.write_all(b"ngth: 11\r\n\r\nhello ").await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    wr.write_all(b"world").await.unwrap();

    let response = responses.next().await.unwrap();
    assert_eq!(response.body, b"hello world".to_vec());

    wr.shutdown().await.unwrap();
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handler_panic_ends_only_the_session() {
    let handler: Arc<dyn Handler> = Arc::new(|_req: Request| -> Response { panic!("boom") });
    let (mut client, session) = start(handler, SessionConfig::default());

    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();

    assert!(matches!(
        session.await.unwrap(),
        Err(SessionError::HandlerPanicked)
    ));
}

#[tokio::test]
async fn test_idle_timeout_at_boundary_closes_cleanly() {
    let config = SessionConfig {
        idle_timeout: Some(Duration::from_millis(50)),
        ..SessionConfig::default()
    };
    let (client, session) = start(hello(), config);
    let (rd, mut wr) = tokio::io::split(client);
    let mut responses = ResponseReader::new(rd);

    wr.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    assert!(responses.next().await.is_some());

    // Stay quiet: the session should half-close on its own.
    assert!(responses.next().await.is_none());
    drop((responses, wr));
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_idle_timeout_mid_request_is_an_error() {
    let config = SessionConfig {
        idle_timeout: Some(Duration::from_millis(50)),
        ..SessionConfig::default()
    };
    let (mut client, session) = start(hello(), config);

    client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

    assert!(matches!(session.await.unwrap(), Err(SessionError::Timeout)));
}

#[tokio::test]
async fn test_blank_line_flood_hits_header_limit() {
    let config = SessionConfig {
        limits: Limits { max_header_bytes: 64, max_body_bytes: 1024 },
        idle_timeout: None,
    };
    let (mut client, session) = start(hello(), config);

    // The session may bail out before all of it is written.
    let _ = client.write_all(&b"\r\n".repeat(1024)).await;

    assert!(matches!(
        session.await.unwrap(),
        Err(SessionError::Parse(ParseError::HeadersTooLarge(64)))
    ));
}

#[tokio::test]
async fn test_bare_lf_before_request_is_skipped() {
    let (client, session) = start(echo_path(), SessionConfig::default());
    let (rd, mut wr) = tokio::io::split(client);
    let mut responses = ResponseReader::new(rd);

    wr.write_all(b"\n\r\nGET /lf HTTP/1.1\r\n\r\n\n").await.unwrap();
    assert_eq!(responses.next().await.unwrap().body, b"/lf".to_vec());

    // A stray LF after the last response is still a clean boundary.
    wr.shutdown().await.unwrap();
    assert!(responses.next().await.is_none());
    session.await.unwrap().unwrap();
}

fn one_byte_chunks(n: usize) -> Vec<u8> {
    let mut wire = b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
    for i in 0..n {
        wire.extend_from_slice(b"1\r\n");
        wire.push(b'a' + (i % 26) as u8);
        wire.extend_from_slice(b"\r\n");
    }
    wire.extend_from_slice(b"0\r\n\r\n");
    wire
}

#[tokio::test]
async fn test_many_small_chunks_up_to_body_limit() {
    let config = SessionConfig {
        limits: Limits { max_header_bytes: 1024, max_body_bytes: 4096 },
        idle_timeout: None,
    };
    let handler: Arc<dyn Handler> = Arc::new(|req: Request| Response::ok(req.body));
    let (client, session) = start(handler, config);
    let (rd, mut wr) = tokio::io::split(client);
    let mut responses = ResponseReader::new(rd);

    wr.write_all(&one_byte_chunks(4096)).await.unwrap();

    let response = responses.next().await.unwrap();
    let expected: Vec<u8> = (0..4096).map(|i| b'a' + (i % 26) as u8).collect();
    assert_eq!(response.body, expected);

    wr.shutdown().await.unwrap();
    session.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_many_small_chunks_over_body_limit() {
    let config = SessionConfig {
        limits: Limits { max_header_bytes: 1024, max_body_bytes: 4096 },
        idle_timeout: None,
    };
    let (mut client, session) = start(hello(), config);

    let _ = client.write_all(&one_byte_chunks(4097)).await;

    assert!(matches!(
        session.await.unwrap(),
        Err(SessionError::Parse(ParseError::BodyTooLarge(4096)))
    ));
}
