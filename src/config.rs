//! Configuration module for the gopherd binary.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::server::{DEFAULT_ADDR, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_REQ_BYTES};

/// Command-line arguments for the Gopher server
#[derive(Parser, Debug, Default)]
#[command(name = "gopherd")]
#[command(version = "0.1.0")]
#[command(about = "A Gopher (RFC 1436) file server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on (e.g., 127.0.0.1:7070)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Directory to serve
    #[arg(short = 'r', long)]
    pub root: Option<PathBuf>,

    /// Follow symbolic links that point outside the served directory
    #[arg(long)]
    pub follow_symlinks: bool,

    /// External host name presented to clients
    #[arg(long)]
    pub host: Option<String>,

    /// External port presented to clients (defaults to the listen port)
    #[arg(long)]
    pub port: Option<String>,

    /// Request read timeout in seconds (0 = none)
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Response write timeout in seconds (0 = none)
    #[arg(long)]
    pub write_timeout: Option<u64>,

    /// Maximum request line size in bytes
    #[arg(long)]
    pub max_request_bytes: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub files: FilesSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Network and protocol settings
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub host: Option<String>,
    pub port: Option<String>,
    /// Seconds
    #[serde(default)]
    pub read_timeout: u64,
    /// Seconds
    #[serde(default)]
    pub write_timeout: u64,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            host: None,
            port: None,
            read_timeout: 0,
            write_timeout: 0,
            max_request_bytes: default_max_request_bytes(),
            max_connections: default_max_connections(),
        }
    }
}

/// Served content
#[derive(Debug, Deserialize, Default)]
pub struct FilesSection {
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_request_bytes() -> usize {
    DEFAULT_MAX_REQ_BYTES
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen: String,
    pub root: PathBuf,
    pub follow_symlinks: bool,
    pub host: String,
    pub port: String,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub max_request_bytes: usize,
    pub max_connections: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, LoadError> {
        Self::from_args(CliArgs::parse())
    }

    /// Resolve already-parsed arguments, reading the TOML file they name.
    pub fn from_args(cli: CliArgs) -> Result<Self, LoadError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| LoadError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| LoadError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, LoadError> {
        let server = toml_config.server;

        let listen = cli.listen.unwrap_or(server.listen);
        let root = cli
            .root
            .or(toml_config.files.root)
            .ok_or(LoadError::MissingRoot)?;
        let host = cli.host.or(server.host).unwrap_or_else(default_host);
        let port = match cli.port.or(server.port) {
            Some(port) => port,
            None => port_of(&listen).ok_or_else(|| LoadError::MissingPort(listen.clone()))?,
        };

        Ok(Config {
            root,
            follow_symlinks: cli.follow_symlinks || toml_config.files.follow_symlinks,
            host,
            port,
            read_timeout: seconds(cli.read_timeout.unwrap_or(server.read_timeout)),
            write_timeout: seconds(cli.write_timeout.unwrap_or(server.write_timeout)),
            max_request_bytes: cli.max_request_bytes.unwrap_or(server.max_request_bytes),
            max_connections: cli.max_connections.unwrap_or(server.max_connections),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            listen,
        })
    }
}

/// Zero means no timeout.
fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Port part of a `host:port` listen address.
fn port_of(listen: &str) -> Option<String> {
    let (_, port) = listen.rsplit_once(':')?;
    (!port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())).then(|| port.to_string())
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read config file '{}': {1}", .0.display())]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {1}", .0.display())]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("No directory to serve: pass --root or set [files] root")]
    MissingRoot,

    #[error("Cannot derive external port from listen address '{0}': pass --port")]
    MissingPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_root() -> CliArgs {
        CliArgs {
            root: Some(PathBuf::from("/srv/gopher")),
            ..CliArgs::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "127.0.0.1:7070");
        assert_eq!(config.server.max_request_bytes, 1024 * 1024);
        assert_eq!(config.server.read_timeout, 0);
        assert_eq!(config.logging.level, "info");
        assert!(config.files.root.is_none());
        assert!(!config.files.follow_symlinks);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:70"
            host = "gopher.example.org"
            read_timeout = 10
            write_timeout = 30
            max_request_bytes = 4096

            [files]
            root = "/var/gopher"
            follow_symlinks = true

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:70");
        assert_eq!(config.server.host.as_deref(), Some("gopher.example.org"));
        assert_eq!(config.server.read_timeout, 10);
        assert_eq!(config.server.write_timeout, 30);
        assert_eq!(config.server.max_request_bytes, 4096);
        assert_eq!(config.server.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.files.root, Some(PathBuf::from("/var/gopher")));
        assert!(config.files.follow_symlinks);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_merge_defaults() {
        let config = Config::merge(cli_with_root(), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:7070");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, "7070");
        assert!(!config.follow_symlinks);
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.write_timeout, None);
        assert_eq!(config.max_request_bytes, DEFAULT_MAX_REQ_BYTES);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "0.0.0.0:70"
            port = "70"
            read_timeout = 10

            [files]
            root = "/var/gopher"
            "#,
        )
        .unwrap();

        let cli = CliArgs {
            listen: Some("127.0.0.1:7071".into()),
            root: Some(PathBuf::from("/tmp/site")),
            read_timeout: Some(0),
            write_timeout: Some(5),
            follow_symlinks: true,
            log_level: Some("trace".into()),
            ..CliArgs::default()
        };

        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.listen, "127.0.0.1:7071");
        assert_eq!(config.root, PathBuf::from("/tmp/site"));
        assert!(config.follow_symlinks);
        // Explicit port from the file wins over the listen port
        assert_eq!(config.port, "70");
        assert_eq!(config.read_timeout, None);
        assert_eq!(config.write_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_missing_root() {
        let err = Config::merge(CliArgs::default(), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, LoadError::MissingRoot));
    }

    #[test]
    fn test_port_of() {
        assert_eq!(port_of("127.0.0.1:7070").as_deref(), Some("7070"));
        assert_eq!(port_of("[::1]:70").as_deref(), Some("70"));
        assert_eq!(port_of("localhost"), None);
        assert_eq!(port_of("host:"), None);
    }

    #[test]
    fn test_config_file_errors() {
        let cli = CliArgs {
            config: Some(PathBuf::from("/nonexistent/gopherd.toml")),
            ..cli_with_root()
        };
        assert!(matches!(Config::from_args(cli), Err(LoadError::FileRead(..))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nlisten = ").unwrap();
        let cli = CliArgs {
            config: Some(path),
            ..cli_with_root()
        };
        assert!(matches!(Config::from_args(cli), Err(LoadError::TomlParse(..))));
    }
}
