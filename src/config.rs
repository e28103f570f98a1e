//! Server configuration.
//!
//! Values come from three layers, lowest precedence first: built-in
//! defaults, an optional YAML file named by `TETHER_CONFIG`, and the
//! `PORT` environment variable.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Where the listener binds. Fixed once the listener starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerConfig {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl ListenerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }
}

/// Size limits applied while parsing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listener: ListenerConfig,
    pub limits: Limits,
    /// How long a keep-alive connection may sit idle between requests.
    pub idle_timeout: Option<Duration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            limits: Limits::default(),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
            log_level: "info".to_string(),
        }
    }
}

/// On-disk shape of the YAML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind_address: Option<IpAddr>,
    port: Option<u16>,
    max_header_bytes: Option<usize>,
    max_body_bytes: Option<usize>,
    idle_timeout_secs: Option<u64>,
    log_level: Option<String>,
}

impl Config {
    /// Builds the configuration from the environment.
    ///
    /// Fails only when `TETHER_CONFIG` names a file that cannot be read or
    /// parsed. A malformed `PORT` falls back to the default.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var("TETHER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Ok(raw) = std::env::var("PORT") {
            cfg.listener.port = parse_port(&raw).unwrap_or(DEFAULT_PORT);
        }

        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        // An empty document deserializes to unit, not to a mapping.
        let file: FileConfig = if text.trim().is_empty() {
            FileConfig::default()
        } else {
            serde_yaml::from_str(text)?
        };

        let mut cfg = Self::default();
        if let Some(addr) = file.bind_address {
            cfg.listener.bind_address = addr;
        }
        if let Some(port) = file.port {
            cfg.listener.port = port;
        }
        if let Some(n) = file.max_header_bytes {
            cfg.limits.max_header_bytes = n;
        }
        if let Some(n) = file.max_body_bytes {
            cfg.limits.max_body_bytes = n;
        }
        if let Some(secs) = file.idle_timeout_secs {
            cfg.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(level) = file.log_level {
            cfg.log_level = level;
        }

        Ok(cfg)
    }
}

pub fn parse_port(raw: &str) -> Option<u16> {
    raw.trim().parse().ok()
}
