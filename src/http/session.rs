use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::{Config, Limits};
use crate::error::SessionError;
use crate::http::handler::Handler;
use crate::http::parser::{leading_newlines, RequestParser};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::send;

const READ_CHUNK: usize = 4096;

/// How long a closing session keeps discarding unread peer bytes after
/// shutting down its write half.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-session settings, copied out of [`Config`] for every connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    pub limits: Limits,
    pub idle_timeout: Option<Duration>,
}

impl From<&Config> for SessionConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            limits: cfg.limits,
            idle_timeout: cfg.idle_timeout,
        }
    }
}

/// Where a session is in its loop. Returning from [`Session::run`] is the
/// terminal state.
enum SessionState {
    Reading,
    Handling(Request),
    Writing(Response),
    Closing,
}

/// One connection's read-handle-write loop.
///
/// The session owns its stream and its read buffer for the whole life of
/// the connection. Bytes read past the end of one request stay in the
/// buffer and start the next one.
pub struct Session<S> {
    stream: S,
    handler: Arc<dyn Handler>,
    config: SessionConfig,
    buffer: BytesMut,
    parser: RequestParser,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, handler: Arc<dyn Handler>, config: SessionConfig) -> Self {
        Self {
            stream,
            handler,
            config,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            parser: RequestParser::new(config.limits),
        }
    }

    /// Runs the session to completion.
    ///
    /// Returns `Ok` when the peer closed at a message boundary or a response
    /// required the connection to close; the write half has been shut down
    /// in both cases. Any error ends the session on the spot, without a
    /// response and without a shutdown.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut state = SessionState::Reading;
        loop {
            state = match state {
                SessionState::Reading => match self.read_request().await? {
                    Some(request) => SessionState::Handling(request),
                    None => SessionState::Closing,
                },

                SessionState::Handling(request) => {
                    let method = request.method;
                    let path = request.path.clone();
                    let response = self.invoke_handler(request).await?;
                    debug!(%method, %path, status = response.status.as_u16(), "Handled request");
                    SessionState::Writing(response)
                }

                SessionState::Writing(mut response) => {
                    let close = send(&mut self.stream, &mut response)
                        .await
                        .map_err(SessionError::Write)?;

                    if close {
                        SessionState::Closing
                    } else {
                        SessionState::Reading
                    }
                }

                SessionState::Closing => {
                    self.shutdown().await;
                    return Ok(());
                }
            };
        }
    }

    /// Reads until one full request is buffered.
    ///
    /// `Ok(None)` is a clean end: the peer closed, or stayed idle past the
    /// idle timeout, with nothing but blank lines buffered.
    async fn read_request(&mut self) -> Result<Option<Request>, SessionError> {
        loop {
            if let Some(request) = self.parser.parse(&mut self.buffer)? {
                return Ok(Some(request));
            }

            self.buffer.reserve(READ_CHUNK);
            let read = self.stream.read_buf(&mut self.buffer);
            let outcome = match self.config.idle_timeout {
                Some(limit) => tokio::time::timeout(limit, read).await.ok(),
                None => Some(read.await),
            };

            let n = match outcome {
                Some(res) => res.map_err(SessionError::Read)?,
                None if self.at_boundary() => {
                    debug!("Idle timeout on keep-alive connection");
                    return Ok(None);
                }
                None => return Err(SessionError::Timeout),
            };

            if n == 0 {
                if self.at_boundary() {
                    trace!("Peer closed connection");
                    return Ok(None);
                }
                return Err(SessionError::UnexpectedEof {
                    buffered: self.buffer.len(),
                });
            }
        }
    }

    /// Nothing but blank lines since the last complete request.
    fn at_boundary(&self) -> bool {
        self.parser.is_idle() && leading_newlines(&self.buffer) == self.buffer.len()
    }

    /// Runs the handler off the I/O threads so a slow one cannot stall
    /// other sessions.
    async fn invoke_handler(&self, request: Request) -> Result<Response, SessionError> {
        let handler = Arc::clone(&self.handler);
        tokio::task::spawn_blocking(move || handler.handle(request))
            .await
            .map_err(|_| SessionError::HandlerPanicked)
    }

    /// Half-closes the connection, then discards whatever the peer still
    /// sends until it closes too or the drain window runs out.
    async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Shutdown failed");
            return;
        }

        let stream = &mut self.stream;
        let drain = async move {
            let mut scratch = [0u8; 1024];
            while let Ok(n) = stream.read(&mut scratch).await {
                if n == 0 {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, drain).await;
    }
}
