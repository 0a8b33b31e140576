//! Configuration module for mqtt-replay
//!
//! Configuration is a single TOML file with three optional sections:
//!
//! ```toml
//! [broker]
//! host = "192.168.1.20"
//! port = 1883
//!
//! [recorder]
//! log_dir = "logs"
//! topics = ["/v3/wireless-module/#"]
//!
//! [playback]
//! speed = 2.0
//! ```
//!
//! Missing sections and keys fall back to defaults. Command line flags are
//! applied on top of the loaded file.
//!
//! # Config File Location
//!
//! The default file lives in the platform config directory:
//! - **Linux**: `~/.config/mqtt-replay/config.toml`
//! - **macOS**: `~/Library/Application Support/mqtt-replay/config.toml`
//! - **Windows**: `%APPDATA%\mqtt-replay\config.toml`

pub mod settings;

pub use settings::*;

use crate::error::{ReplayError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "mqtt-replay";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Default broker host
pub const DEFAULT_BROKER_HOST: &str = "localhost";

/// Default MQTT port
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Default keep-alive interval in seconds
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

/// Default time allowed for the broker to acknowledge a connection
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Default outgoing request queue capacity
pub const DEFAULT_REQUEST_CAPACITY: usize = 1024;

/// Default number of reconnect attempts after an established connection drops
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 10;

/// Default base delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;

/// Default log file extension
pub const DEFAULT_LOG_EXTENSION: &str = "csv";

/// Multi-level wildcard subscribing to every topic
pub const WILDCARD_ALL: &str = "#";

/// Get the application config directory path
pub fn app_config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn default_config_path() -> Option<PathBuf> {
    app_config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Broker connection settings
    pub broker: BrokerConfig,
    /// Recording settings
    pub recorder: RecorderConfig,
    /// Playback settings
    pub playback: PlaybackConfig,
}

impl AppConfig {
    /// Parse a config from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ReplayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReplayError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::from_toml(&content).map_err(|e| e.with_context(format!("{:?}", path)))
    }

    /// Load from an explicit path, or from the default location if present
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::debug!("Loading config from {:?}", path);
                Self::load(path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Save the config as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ReplayError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ReplayError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            ReplayError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}
