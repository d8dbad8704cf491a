/*!
Configuration management for the laser controller.
*/

use crate::pointing::{ControllerSetup, LinkSetup, PointingTarget};
use crate::recorder::RecordingOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::protocol::{DEFAULT_HEIGHT_OFFSET, GPS_BAUD_RATE, LASER_BAUD_RATE, READ_TIMEOUT_MS};
use shared::SerialPortOpener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub laser: LaserConfig,
    pub gps_a: GpsConfig,
    pub gps_b: GpsConfig,
    pub pointing: PointingConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            laser: LaserConfig::default(),
            gps_a: GpsConfig::default(),
            gps_b: GpsConfig::default(),
            pointing: PointingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Load the file if it exists, defaults otherwise
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            warn!("⚠️ Config file {} not found, using defaults", path.as_ref().display());
            Ok(Self::new())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Serial openers and recording options for all three links
    pub fn controller_setup(&self) -> ControllerSetup {
        ControllerSetup {
            laser: LinkSetup {
                opener: Arc::new(self.laser.opener()),
                recording: self.logging.recording_for("laser", false),
            },
            gps: [
                LinkSetup {
                    opener: Arc::new(self.gps_a.opener()),
                    recording: self.logging.recording_for("gps_a", true),
                },
                LinkSetup {
                    opener: Arc::new(self.gps_b.opener()),
                    recording: self.logging.recording_for("gps_b", true),
                },
            ],
            height_offsets: [self.gps_a.height_offset, self.gps_b.height_offset],
            initial_target: self.pointing.initial_target,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Link to the laser pointing system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserConfig {
    /// Port opened at startup, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    pub baud_rate: u32,

    /// Read timeout, also the worst-case shutdown latency
    pub timeout_ms: u64,
}

impl LaserConfig {
    pub fn opener(&self) -> SerialPortOpener {
        SerialPortOpener::new(self.baud_rate, Duration::from_millis(self.timeout_ms))
    }
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: LASER_BAUD_RATE,
            timeout_ms: READ_TIMEOUT_MS,
        }
    }
}

/// One RTK GPS receiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsConfig {
    /// Port opened at startup, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,

    pub baud_rate: u32,

    pub timeout_ms: u64,

    /// Antenna height above the reference point, subtracted from every fix (m)
    pub height_offset: f64,
}

impl GpsConfig {
    pub fn opener(&self) -> SerialPortOpener {
        SerialPortOpener::new(self.baud_rate, Duration::from_millis(self.timeout_ms))
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: GPS_BAUD_RATE,
            timeout_ms: READ_TIMEOUT_MS,
            height_offset: DEFAULT_HEIGHT_OFFSET,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointingConfig {
    pub initial_target: PointingTarget,
}

impl Default for PointingConfig {
    fn default() -> Self {
        Self {
            initial_target: PointingTarget::BalloonA,
        }
    }
}

/// Session log files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Root directory, one subdirectory per link
    pub directory: String,

    /// Enable session logging at all
    pub enabled: bool,

    /// Record unmodified byte streams
    pub record_raw: bool,

    /// Record calibrated GPS fixes as CSV
    pub record_locations: bool,
}

impl LoggingConfig {
    pub fn recording_for(&self, link: &str, locations: bool) -> RecordingOptions {
        RecordingOptions {
            directory: self
                .enabled
                .then(|| PathBuf::from(&self.directory).join(link)),
            raw: self.record_raw,
            locations: locations && self.record_locations,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            enabled: true,
            record_raw: true,
            record_locations: true,
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
        original_config.laser.port = Some("/dev/ttyACM0".to_string());
        original_config.gps_b.height_offset = 1.25;
        original_config.pointing.initial_target = PointingTarget::BalloonB;

        let temp_file = NamedTempFile::new().unwrap();
        let temp_path = temp_file.path();

        original_config.save_to_file(temp_path).unwrap();
        let loaded_config = AppConfig::load_from_file(temp_path).unwrap();

        assert_eq!(original_config, loaded_config);
    }

    #[test]
    fn test_default_values() {
        let config = AppConfig::new();

        assert_eq!(config.laser.baud_rate, 9600);
        assert_eq!(config.gps_a.baud_rate, 115_200);
        assert_eq!(config.gps_b.timeout_ms, 1000);
        assert_eq!(config.gps_a.height_offset, 0.26);
        assert!(config.laser.port.is_none());
        assert_eq!(config.pointing.initial_target, PointingTarget::BalloonA);

        let setup = config.controller_setup();
        assert_eq!(setup.laser.recording.directory, Some(PathBuf::from("logs/laser")));
        assert!(!setup.laser.recording.locations);
        assert_eq!(setup.gps[1].recording.directory, Some(PathBuf::from("logs/gps_b")));
        assert!(setup.gps[1].recording.locations && setup.gps[1].recording.raw);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            "[gps_b]\nport = \"COM7\"\n\n[pointing]\ninitial_target = \"b\"\n\n[logging]\nenabled = false\n",
        )
        .unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.gps_b.port.as_deref(), Some("COM7"));
        assert_eq!(config.gps_b.baud_rate, 115_200);
        assert_eq!(config.laser, LaserConfig::default());
        assert_eq!(config.pointing.initial_target, PointingTarget::BalloonB);
        assert!(config.controller_setup().gps[0].recording.directory.is_none());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = AppConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::new());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "[laser]\nbaud_rate = \"fast\"\n").unwrap();
        assert!(AppConfig::load_from_file(temp_file.path()).is_err());
    }
}
