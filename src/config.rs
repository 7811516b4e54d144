use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::mcp::errors::ConfigError;

pub const ENV_HOST: &str = "EDITOR_BRIDGE_HOST";
pub const ENV_PORT: &str = "EDITOR_BRIDGE_PORT";
pub const ENV_LOG_LEVEL: &str = "EDITOR_BRIDGE_LOG_LEVEL";
pub const ENV_LOG_DIR: &str = "EDITOR_BRIDGE_LOG_DIR";
pub const ENV_SNAPSHOT_STALE_SECS: &str = "EDITOR_BRIDGE_SNAPSHOT_STALE_SECS";
pub const ENV_COMMAND_TIMEOUT_SECS: &str = "EDITOR_BRIDGE_COMMAND_TIMEOUT_SECS";
pub const ENV_SESSION_TIMEOUT_SECS: &str = "EDITOR_BRIDGE_SESSION_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set
    pub level: String,
    /// Daily rolling log files are written here when set
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    pub session_timeout_secs: u64,
    pub cleanup_interval_secs: u64,
    pub snapshot_stale_after_secs: u64,
    pub command_timeout_secs: u64,
    pub keepalive_interval_secs: u64,
    /// Frames buffered per event stream before writes start waiting
    pub sse_buffer: usize,
    pub sse_write_timeout_secs: u64,
    pub max_body_bytes: usize,
    pub logging: LoggingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6505,
            session_timeout_secs: 1800,
            cleanup_interval_secs: 60,
            snapshot_stale_after_secs: 10,
            command_timeout_secs: 30,
            keepalive_interval_secs: 15,
            sse_buffer: 64,
            sse_write_timeout_secs: 10,
            max_body_bytes: 1024 * 1024,
            logging: LoggingConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                debug!("Loading configuration from {}", path.display());
                Ok(serde_json::from_str(&contents)?)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No configuration file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` as the environment
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = parse_number(ENV_PORT, &port)?;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(dir) = lookup(ENV_LOG_DIR) {
            self.logging.directory = Some(PathBuf::from(dir));
        }
        if let Some(secs) = lookup(ENV_SNAPSHOT_STALE_SECS) {
            self.snapshot_stale_after_secs = parse_number(ENV_SNAPSHOT_STALE_SECS, &secs)?;
        }
        if let Some(secs) = lookup(ENV_COMMAND_TIMEOUT_SECS) {
            self.command_timeout_secs = parse_number(ENV_COMMAND_TIMEOUT_SECS, &secs)?;
        }
        if let Some(secs) = lookup(ENV_SESSION_TIMEOUT_SECS) {
            self.session_timeout_secs = parse_number(ENV_SESSION_TIMEOUT_SECS, &secs)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".to_string()));
        }

        let timeouts = [
            ("session_timeout_secs", self.session_timeout_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
            ("snapshot_stale_after_secs", self.snapshot_stale_after_secs),
            ("command_timeout_secs", self.command_timeout_secs),
            ("keepalive_interval_secs", self.keepalive_interval_secs),
            ("sse_write_timeout_secs", self.sse_write_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
        }

        if self.sse_buffer == 0 {
            return Err(ConfigError::Invalid("sse_buffer must be non-zero".to_string()));
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn snapshot_stale_after(&self) -> Duration {
        Duration::from_secs(self.snapshot_stale_after_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    pub fn sse_write_timeout(&self) -> Duration {
        Duration::from_secs(self.sse_write_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} is not a valid number: {}", key, value)))
}
