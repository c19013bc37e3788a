//! Broker configuration file loading (spec.md §6).
//!
//! Port and raft-port are startup/command-line parameters, not part of this
//! file — only `host`, `token`, `server_host`, `server_port` (the manager
//! endpoint) live here.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub token: String,
    pub server_host: String,
    pub server_port: u16,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "could not read config file: {}", e),
            Self::Parse(e) => write!(f, "could not parse config file: {}", e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_schema() {
        let raw = r#"{
            "host": "broker-1",
            "token": "secret",
            "server_host": "127.0.0.1",
            "server_port": 9000
        }"#;

        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.host, "broker-1");
        assert_eq!(config.server_port, 9000);
    }
}
