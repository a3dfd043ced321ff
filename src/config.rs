//! Runtime configuration, loaded from TOML.

use crate::domain::service::{ConnectionPolicy, ServiceOptions};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Reads `path` if it exists, otherwise returns the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Deadline for every command's completion event. Unset means wait forever.
    #[serde(default)]
    pub command_timeout_ms: Option<u64>,
}

impl BridgeConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl ServiceConfig {
    pub fn options(&self, policy: ConnectionPolicy) -> ServiceOptions {
        ServiceOptions {
            policy,
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            ..ServiceOptions::default()
        }
    }
}

fn default_reconnect_delay() -> u64 {
    1000
}
fn default_max_reconnect_attempts() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_readers")]
    pub readers: Vec<String>,
    #[serde(default = "default_location")]
    pub location_id: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Delay before each completion event is emitted.
    #[serde(default)]
    pub latency_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            readers: default_readers(),
            location_id: default_location(),
            currency: default_currency(),
            latency_ms: 0,
        }
    }
}

fn default_readers() -> Vec<String> {
    vec!["SIM-READER-0001".to_string(), "SIM-READER-0002".to_string()]
}
fn default_location() -> String {
    "tml_simulated".to_string()
}
fn default_currency() -> String {
    "gbp".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directives; `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "terminal_bridge=info".to_string()
}
