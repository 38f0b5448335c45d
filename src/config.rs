//! Configuration module for echo-daemon.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default number of tracked client slots.
pub const MAX_CLIENTS: usize = 30;

/// Default listen backlog.
pub const BACKLOG: i32 = 3;

/// Command-line arguments for the echo server
#[derive(Parser, Debug, Default)]
#[command(name = "echo-daemon")]
#[command(author = "echo-daemon authors")]
#[command(version = "0.1.0")]
#[command(about = "A multiplexed TCP echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8888)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrently tracked clients
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Listen backlog for pending connections
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Registry capacity
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_clients: default_max_clients(),
            backlog: default_backlog(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8888".to_string()
}

fn default_max_clients() -> usize {
    MAX_CLIENTS
}

fn default_backlog() -> i32 {
    BACKLOG
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_clients: usize,
    pub backlog: i32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8888)),
            max_clients: MAX_CLIENTS,
            backlog: BACKLOG,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::from_parts(cli, toml_config)
    }

    /// Merge CLI args over TOML values. CLI takes precedence.
    pub fn from_parts(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(listen.clone()))?;

        let max_clients = cli.max_clients.unwrap_or(toml_config.server.max_clients);
        if max_clients == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        Ok(Config {
            listen,
            max_clients,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String),
    ZeroCapacity,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidListen(addr) => {
                write!(f, "Invalid listen address '{addr}'")
            }
            ConfigError::ZeroCapacity => write!(f, "max_clients must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::from_parts(CliArgs::default(), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8888".parse().unwrap());
        assert_eq!(config.max_clients, 30);
        assert_eq!(config.backlog, 3);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:9999"
            max_clients = 4
            backlog = 16

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9999");
        assert_eq!(config.server.max_clients, 4);
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str("[server]\nmax_clients = 4\n").unwrap();
        let cli = CliArgs {
            listen: Some("127.0.0.1:7000".to_string()),
            max_clients: Some(8),
            ..Default::default()
        };

        let config = Config::from_parts(cli, file).unwrap();
        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.max_clients, 8);
        assert_eq!(config.backlog, BACKLOG);
    }

    #[test]
    fn test_rejects_bad_values() {
        let cli = CliArgs {
            listen: Some("not an address".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Config::from_parts(cli, TomlConfig::default()),
            Err(ConfigError::InvalidListen(_))
        ));

        let cli = CliArgs {
            max_clients: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            Config::from_parts(cli, TomlConfig::default()),
            Err(ConfigError::ZeroCapacity)
        ));
    }
}
