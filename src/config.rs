//! Configuration for the scan server and the watching client

use crate::client::connection::ReconnectPolicy;
use crate::error::ScanError;
use crate::scanner::DEFAULT_BATCH_SIZE;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-user config file in the home directory.
pub const CONFIG_FILE_NAME: &str = ".subnetwatch.toml";

/// Scan server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub bind_address: String,

    /// Listening port; the `PORT` environment variable overrides it
    pub port: u16,

    /// Addresses probed concurrently within one range
    pub batch_size: usize,

    /// Per-probe timeout in milliseconds
    pub probe_timeout_ms: u64,

    /// Outbound events buffered per connection before the session waits
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 3000,
            batch_size: DEFAULT_BATCH_SIZE,
            probe_timeout_ms: 1000,
            event_buffer: 32,
        }
    }
}

impl ServerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_probe_timeout(mut self, timeout_ms: u64) -> Self {
        self.probe_timeout_ms = timeout_ms;
        self
    }

    /// Apply the `PORT` environment variable, if set and valid.
    pub fn apply_env(mut self) -> Self {
        if let Ok(raw) = std::env::var("PORT") {
            match raw.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("Ignoring invalid PORT value {:?}", raw),
            }
        }
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_size == 0 {
            return Err(ScanError::Config("batch_size must be greater than 0".to_string()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(ScanError::Config("probe_timeout_ms must be greater than 0".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(ScanError::Config("event_buffer must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Watching client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint of the scan server
    pub server_url: String,

    /// Delay before reconnecting, in milliseconds
    pub reconnect_delay_ms: u64,

    /// Double the delay after each failed attempt instead of keeping it fixed
    pub reconnect_backoff: bool,

    /// Upper bound for the backoff delay, in milliseconds
    pub reconnect_max_delay_ms: u64,

    /// Where the range list is persisted; defaults to the user data directory
    pub state_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:3000/ws".to_string(),
            reconnect_delay_ms: 3000,
            reconnect_backoff: false,
            reconnect_max_delay_ms: 30_000,
            state_file: None,
        }
    }
}

impl ClientConfig {
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        let base = Duration::from_millis(self.reconnect_delay_ms);
        if self.reconnect_backoff {
            ReconnectPolicy::Backoff {
                base,
                max: Duration::from_millis(self.reconnect_max_delay_ms.max(self.reconnect_delay_ms)),
            }
        } else {
            ReconnectPolicy::Fixed(base)
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            return Err(ScanError::Config(format!(
                "server_url must be a ws:// or wss:// URL, got {}",
                self.server_url
            )));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ScanError::Config("reconnect_delay_ms must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Layout of the TOML config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScanError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Load `~/.subnetwatch.toml`, falling back to defaults
    pub fn load_default_config() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_path = home_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            match Self::from_toml_file(&config_path) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    return config;
                }
                Err(e) => warn!("Ignoring {}: {}", config_path.display(), e),
            }
        }

        Self::default()
    }

    /// Load from an explicit path when given, otherwise the default location
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(path) => Self::from_toml_file(path),
            None => Ok(Self::load_default_config()),
        }
    }
}
