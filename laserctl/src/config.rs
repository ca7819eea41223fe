/*!
Configuration management for the laser mount controller.
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::protocol::{DEFAULT_TELESCOPE_PORT, REFRESH_REPEAT};
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Default log filter, overridden by `RUST_LOG`
    pub log_level: String,
    pub device: DeviceConfig,
    pub telescope: TelescopeConfig,
    pub tracking: TrackingConfig,
    pub calibration: CalibrationConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            device: DeviceConfig::default(),
            telescope: TelescopeConfig::default(),
            tracking: TrackingConfig::default(),
            calibration: CalibrationConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig =
            toml::from_str(&content).with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Serial link to the mount controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Port to connect on start, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    pub baud_rate: u32,

    /// How long one read may block before it counts as an empty read
    pub read_timeout_ms: u64,
}

impl DeviceConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            read_timeout_ms: 2000,
        }
    }
}

/// Planetarium telescope server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelescopeConfig {
    pub bind_addr: String,
    pub port: u16,
    pub backlog: i32,

    /// Copies of each position report sent to the planetarium
    pub refresh_repeat: usize,
}

impl Default for TelescopeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: DEFAULT_TELESCOPE_PORT,
            backlog: 1,
            refresh_repeat: REFRESH_REPEAT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub interval_seconds: u64,
}

impl TrackingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { interval_seconds: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub start_in_calibration_mode: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            start_in_calibration_mode: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_roundtrip() {
        let mut original_config = AppConfig::new();
        original_config.device.port = Some("/dev/ttyUSB0".to_string());
        original_config.tracking.interval_seconds = 7;

        let temp_file = NamedTempFile::new().unwrap();
        let temp_path = temp_file.path();

        original_config.save_to_file(temp_path).unwrap();
        let loaded_config = AppConfig::load_from_file(temp_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::new();

        assert_eq!(config.log_level, "info");
        assert_eq!(config.device.port, None);
        assert_eq!(config.device.baud_rate, 9600);
        assert_eq!(config.device.read_timeout(), Duration::from_secs(2));
        assert_eq!(config.telescope.bind_addr, "127.0.0.1");
        assert_eq!(config.telescope.port, 10001);
        assert_eq!(config.telescope.backlog, 1);
        assert_eq!(config.telescope.refresh_repeat, 10);
        assert_eq!(config.tracking.interval(), Duration::from_secs(5));
        assert!(config.calibration.start_in_calibration_mode);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[telescope]\nport = 10002\n").unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.telescope.port, 10002);
        assert_eq!(config.telescope.bind_addr, "127.0.0.1");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.device.baud_rate, 9600);
    }

    #[test]
    fn test_invalid_file_is_reported() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[telescope\n").unwrap();

        let err = AppConfig::load_from_file(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("TOML"));
    }
}
