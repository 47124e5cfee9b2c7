// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ingest server configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Ingest server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host name or address to listen on
    pub host: String,

    /// TCP port to listen on (0 picks an ephemeral port)
    pub port: u16,

    /// SQLite database file
    pub db_path: PathBuf,

    /// Longest accepted line in bytes; longer lines are discarded as malformed
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// Per-connection cap on malformed-line warnings (None = unlimited)
    #[serde(default)]
    pub malformed_report_limit: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_max_line_length() -> usize {
    64 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServerConfig {
    /// Create a configuration with defaults for the optional settings.
    pub fn new(host: impl Into<String>, port: u16, db_path: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            port,
            db_path: db_path.into(),
            max_line_length: default_max_line_length(),
            malformed_report_limit: None,
            log_level: default_log_level(),
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `host:port` string handed to the listener.
    pub fn listen_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            // Bare IPv6 literal
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::InvalidValue("host cannot be empty".into()));
        }
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue("db_path cannot be empty".into()));
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::InvalidValue(
                "max_line_length cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let config = ServerConfig::new("0.0.0.0", 2000, "readings.db");
        assert_eq!(config.port, 2000);
        assert_eq!(config.max_line_length, 64 * 1024);
        assert_eq!(config.malformed_report_limit, None);
        assert_eq!(config.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_listen_address() {
        assert_eq!(
            ServerConfig::new("127.0.0.1", 2000, "x.db").listen_address(),
            "127.0.0.1:2000"
        );
        assert_eq!(
            ServerConfig::new("localhost", 2000, "x.db").listen_address(),
            "localhost:2000"
        );
        assert_eq!(
            ServerConfig::new("::1", 2000, "x.db").listen_address(),
            "[::1]:2000"
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"host": "0.0.0.0", "port": 2000, "db_path": "r.db"}"#)
                .unwrap();
        assert_eq!(config.max_line_length, 64 * 1024);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ingest.json");

        let mut config = ServerConfig::new("0.0.0.0", 2000, "r.db");
        config.malformed_report_limit = Some(10);
        config.to_file(&path).unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.port, 2000);
        assert_eq!(loaded.malformed_report_limit, Some(10));
    }

    #[test]
    fn test_validation() {
        let config = ServerConfig::new("", 2000, "r.db");
        assert!(config.validate().is_err());

        let config = ServerConfig::new("0.0.0.0", 2000, "");
        assert!(config.validate().is_err());

        let mut config = ServerConfig::new("0.0.0.0", 2000, "r.db");
        config.max_line_length = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ServerConfig::from_file(Path::new("/nonexistent/ingest.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
