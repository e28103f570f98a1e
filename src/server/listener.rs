use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::config::ListenerConfig;
use crate::error::{ServerError, SessionError};
use crate::http::handler::Handler;
use crate::http::session::{Session, SessionConfig};

/// Pause after a transient accept failure, so that running out of file
/// descriptors does not turn into a busy loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A bound TCP listener that hands every connection to its own session.
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    pub async fn bind(cfg: &ListenerConfig) -> Result<Self, ServerError> {
        let addr = cfg.socket_addr();
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = inner
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!("Listening on {}", local_addr);
        Ok(Self { inner, local_addr })
    }

    /// The address actually bound, which differs from the configured one
    /// when port 0 was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// Each connection runs in its own task and is never waited on:
    /// cancelling only stops new accepts, sessions in flight finish on
    /// their own.
    pub async fn serve(
        self,
        handler: Arc<dyn Handler>,
        session_cfg: SessionConfig,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Listener stopped");
                    return Ok(());
                }
                res = self.inner.accept() => res,
            };

            let (socket, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
                Err(e) => return Err(ServerError::Accept(e)),
            };

            info!("Accepted connection from {}", peer);
            if let Err(e) = socket.set_nodelay(true) {
                warn!(%peer, error = %e, "Failed to set TCP_NODELAY");
            }

            let session = Session::new(socket, Arc::clone(&handler), session_cfg);
            let span = tracing::info_span!("session", %peer);
            tokio::spawn(
                async move {
                    if let Err(e) = session.run().await {
                        report(&e);
                    }
                }
                .instrument(span),
            );
        }
    }
}

fn report(err: &SessionError) {
    match err {
        SessionError::Read(_) | SessionError::Write(_) | SessionError::UnexpectedEof { .. } => {
            warn!(error = %err, "Session ended with I/O failure")
        }
        SessionError::Parse(_) | SessionError::Timeout => {
            warn!(error = %err, "Session ended on bad request")
        }
        SessionError::HandlerPanicked => tracing::error!(error = %err, "Session aborted"),
    }
}

/// Accept failures that concern a single connection or a momentary
/// resource shortage, rather than the listening socket itself.
fn is_transient(err: &std::io::Error) -> bool {
    match err.kind() {
        ErrorKind::ConnectionAborted
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionRefused
        | ErrorKind::Interrupted
        | ErrorKind::TimedOut
        | ErrorKind::WouldBlock
        | ErrorKind::OutOfMemory => true,
        ErrorKind::InvalidInput | ErrorKind::NotConnected | ErrorKind::Unsupported => false,
        // EMFILE, ENFILE, ENOBUFS and friends surface uncategorized.
        _ => !is_bad_descriptor(err),
    }
}

#[cfg(unix)]
const EBADF: i32 = 9;

#[cfg(any(target_os = "linux", target_os = "android"))]
const ENOTSOCK: Option<i32> = Some(88);

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
const ENOTSOCK: Option<i32> = Some(38);

#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))
))]
const ENOTSOCK: Option<i32> = None;

#[cfg(unix)]
fn is_bad_descriptor(err: &std::io::Error) -> bool {
    match err.raw_os_error() {
        Some(code) => code == EBADF || Some(code) == ENOTSOCK,
        None => false,
    }
}

#[cfg(not(unix))]
fn is_bad_descriptor(_err: &std::io::Error) -> bool {
    false
}
