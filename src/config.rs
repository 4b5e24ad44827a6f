//! Server configuration.
//!
//! Layered with `figment`: built-in defaults, then an optional TOML file,
//! then `TASKRELAY_*` environment variables, then command-line overrides.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

pub const DEFAULT_CONFIG_FILE: &str = "taskrelay.toml";
pub const ENV_PREFIX: &str = "TASKRELAY_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub log_level: LogLevel,
    /// Emit logs as JSON instead of human-readable lines.
    pub json_logs: bool,
    /// Longest accepted message, excluding the newline.
    pub max_message_bytes: usize,
    /// Write request-reply outputs back to the peer.
    pub reply_to_requests: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8052,
            log_level: LogLevel::Info,
            json_logs: false,
            max_message_bytes: 64 * 1024,
            reply_to_requests: true,
        }
    }
}

impl ServerConfig {
    /// Load the layered configuration. `file` defaults to `taskrelay.toml` in
    /// the working directory; a missing file is not an error.
    pub fn load<T: Serialize>(
        file: Option<&Path>,
        overrides: Option<&T>,
    ) -> Result<Self, figment::Error> {
        Self::figment(file, overrides).extract()
    }

    pub fn figment<T: Serialize>(file: Option<&Path>, overrides: Option<&T>) -> Figment {
        let file = file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }
        figment
    }

    /// Resolve `(bind_address, port)` to the address to listen on.
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        let address = format!("{}:{}", self.bind_address, self.port);
        let resolve_error = |source| ServerError::Resolve {
            address: address.clone(),
            source,
        };

        (self.bind_address.as_str(), self.port)
            .to_socket_addrs()
            .map_err(resolve_error)?
            .next()
            .ok_or_else(|| {
                resolve_error(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no addresses found",
                ))
            })
    }
}

/// Log verbosity threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        log_level: Option<LogLevel>,
    }

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let config = ServerConfig::load(Some(&path), None::<&Overrides>).unwrap();

        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.port, 8052);
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.reply_to_requests);
    }

    #[test]
    fn test_file_then_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port = 9100\nlog_level = \"debug\"\nmax_message_bytes = 512"
        )
        .unwrap();

        let overrides = Overrides {
            port: Some(9200),
            log_level: None,
        };
        let config = ServerConfig::load(Some(file.path()), Some(&overrides)).unwrap();

        assert_eq!(config.port, 9200);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.max_message_bytes, 512);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_level = \"loud\"").unwrap();

        assert!(ServerConfig::load(Some(file.path()), None::<&Overrides>).is_err());
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let addr = config.socket_addr().unwrap();
        assert!(addr.ip().is_loopback());

        let config = ServerConfig {
            bind_address: "not an address".to_string(),
            ..Default::default()
        };
        assert!(config.socket_addr().unwrap_err().is_startup_fault());
    }
}
