//! Configuration module
//!
//! Handles loading and saving FrameLink configuration.

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::{NetworkConfig, DEFAULT_REPLY_BUFFER_SIZE};
use crate::protocol::{DEFAULT_HOST, DEFAULT_PORT};
use crate::sensor::{
    SerialSettings, DEFAULT_BAUD_RATE, DEFAULT_INTERVAL_MS, DEFAULT_PRESSURE_RANGE,
    DEFAULT_TEMPERATURE_RANGE,
};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Frame client settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Frame receiver settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Sensor simulator settings
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Serial monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Frame client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server host name or address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connection timeout in ms
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Reply timeout in ms (unset = wait for the server indefinitely)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout_ms: Option<u64>,
    /// Maximum bytes read from the reply
    #[serde(default = "default_reply_buffer_size")]
    pub reply_buffer_size: usize,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_reply_buffer_size() -> usize {
    DEFAULT_REPLY_BUFFER_SIZE
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
            read_timeout_ms: None,
            reply_buffer_size: default_reply_buffer_size(),
        }
    }
}

impl ClientConfig {
    /// Network settings for the transport
    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            connect_timeout_ms: self.connect_timeout_ms,
            read_timeout_ms: self.read_timeout_ms,
            reply_buffer_size: self.reply_buffer_size,
        }
    }
}

/// Frame receiver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_host(),
            port: default_port(),
        }
    }
}

/// Sensor simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Serial device to write to
    #[serde(default = "default_simulator_device")]
    pub device: PathBuf,
    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Interval between readings in ms
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Lower temperature bound, °C
    #[serde(default = "default_temperature_min")]
    pub temperature_min: f64,
    /// Upper temperature bound (exclusive), °C
    #[serde(default = "default_temperature_max")]
    pub temperature_max: f64,
    /// Lower pressure bound, MPa
    #[serde(default = "default_pressure_min")]
    pub pressure_min: f64,
    /// Upper pressure bound (exclusive), MPa
    #[serde(default = "default_pressure_max")]
    pub pressure_max: f64,
}

fn default_simulator_device() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("COM3")
    } else {
        PathBuf::from("/dev/pts/1")
    }
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_MS
}

fn default_temperature_min() -> f64 {
    DEFAULT_TEMPERATURE_RANGE.start
}

fn default_temperature_max() -> f64 {
    DEFAULT_TEMPERATURE_RANGE.end
}

fn default_pressure_min() -> f64 {
    DEFAULT_PRESSURE_RANGE.start
}

fn default_pressure_max() -> f64 {
    DEFAULT_PRESSURE_RANGE.end
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            device: default_simulator_device(),
            baud_rate: default_baud_rate(),
            interval_ms: default_interval(),
            temperature_min: default_temperature_min(),
            temperature_max: default_temperature_max(),
            pressure_min: default_pressure_min(),
            pressure_max: default_pressure_max(),
        }
    }
}

impl SimulatorConfig {
    pub fn serial(&self) -> SerialSettings {
        SerialSettings::new(self.device.clone(), self.baud_rate)
    }

    pub fn temperature_range(&self) -> Range<f64> {
        self.temperature_min..self.temperature_max
    }

    pub fn pressure_range(&self) -> Range<f64> {
        self.pressure_min..self.pressure_max
    }
}

/// Serial monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Serial device to read from
    #[serde(default = "default_monitor_device")]
    pub device: PathBuf,
    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_monitor_device() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("COM4")
    } else {
        PathBuf::from("/dev/pts/2")
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device: default_monitor_device(),
            baud_rate: default_baud_rate(),
        }
    }
}

impl MonitorConfig {
    pub fn serial(&self) -> SerialSettings {
        SerialSettings::new(self.device.clone(), self.baud_rate)
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that cannot work at runtime
    pub fn validate(&self) -> ConfigResult<()> {
        if self.client.reply_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "client.reply_buffer_size must be at least 1".to_string(),
            ));
        }
        if self.simulator.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "simulator.interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("framelink/config.toml")),
            Some(PathBuf::from("./framelink.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                tracing::debug!("Loading configuration from {}", path.display());
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Sample configuration pointing the client at a LAN server
pub fn sample_config() -> Config {
    Config {
        client: ClientConfig {
            host: "192.168.1.50".to_string(),
            read_timeout_ms: Some(3000),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    Ok(toml::to_string_pretty(&sample_config())?)
}
