use std::sync::Arc;

use tether::config::{parse_port, Config, DEFAULT_PORT};
use tether::http::handler::HelloWorld;
use tether::http::session::SessionConfig;
use tether::server::Listener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    if let Ok(raw) = std::env::var("PORT") {
        if parse_port(&raw).is_none() {
            tracing::warn!(value = %raw, default = DEFAULT_PORT, "Invalid PORT, using default");
        }
    }

    let listener = Listener::bind(&cfg.listener).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(stop_on_signal(shutdown.clone()));

    listener
        .serve(Arc::new(HelloWorld), SessionConfig::from(&cfg), shutdown)
        .await?;

    Ok(())
}

async fn stop_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;

    tracing::info!("Shutdown signal received");
    token.cancel();
}
