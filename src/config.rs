//! Sensor link configuration
//!
//! Loaded from YAML or JSON (chosen by file extension), then overridden by
//! `S8_PORT`, `S8_BAUD_RATE` and `S8_TIMEOUT_MS` from the environment.
//!
//! ```yaml
//! port: /dev/ttyUSB0
//! baud_rate: 9600
//! timeout_ms: 5000
//! pwm_full_scale_ppm: 2000.0
//! packet_logging: true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SensorError, SensorResult};
use crate::registers::DEFAULT_PWM_FULL_SCALE_PPM;
use crate::utils::validation::validate_baud_rate;
use crate::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};

/// Serial port used when nothing is configured
#[cfg(windows)]
pub const DEFAULT_PORT: &str = "COM1";
#[cfg(not(windows))]
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Device path or name of the serial port
    pub port: String,
    pub baud_rate: u32,
    /// Per-request response deadline
    pub timeout_ms: u64,
    /// 2000.0 for the standard sensor, 10000.0 for extended range
    pub pwm_full_scale_ppm: f64,
    /// Log every frame at info level
    pub packet_logging: bool,
    /// End-of-frame silence; derived from the baud rate when unset
    pub frame_gap_ms: Option<u64>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            pwm_full_scale_ppm: DEFAULT_PWM_FULL_SCALE_PPM,
            packet_logging: false,
            frame_gap_ms: None,
        }
    }
}

impl SensorConfig {
    /// Parse a file, pick the format from its extension
    pub fn from_file<P: AsRef<Path>>(path: P) -> SensorResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SensorError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;

        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(SensorError::configuration(format!(
                    "Unsupported config format {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load the file if given, otherwise defaults, then apply the environment
    pub fn load(path: Option<&Path>) -> SensorResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `S8_*` overrides from a variable lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> SensorResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("S8_PORT") {
            self.port = port;
        }
        if let Some(baud) = lookup("S8_BAUD_RATE") {
            self.baud_rate = baud
                .trim()
                .parse()
                .map_err(|_| SensorError::configuration(format!("S8_BAUD_RATE={} is not a number", baud)))?;
        }
        if let Some(timeout) = lookup("S8_TIMEOUT_MS") {
            self.timeout_ms = timeout
                .trim()
                .parse()
                .map_err(|_| SensorError::configuration(format!("S8_TIMEOUT_MS={} is not a number", timeout)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> SensorResult<()> {
        if self.port.trim().is_empty() {
            return Err(SensorError::configuration("Serial port must not be empty"));
        }
        validate_baud_rate(self.baud_rate)?;
        if self.timeout_ms == 0 {
            return Err(SensorError::configuration("timeout_ms must be positive"));
        }
        if self.pwm_full_scale_ppm.is_nan() || self.pwm_full_scale_ppm <= 0.0 {
            return Err(SensorError::configuration(format!(
                "pwm_full_scale_ppm must be positive, got {}",
                self.pwm_full_scale_ppm
            )));
        }
        if self.frame_gap_ms == Some(0) {
            return Err(SensorError::configuration("frame_gap_ms must be positive"));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> SensorResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SensorConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout_ms, 5000);
        assert_eq!(config.pwm_full_scale_ppm, 2000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: SensorConfig = serde_yaml::from_str("port: /dev/ttyS3\npwm_full_scale_ppm: 10000.0\n").unwrap();
        assert_eq!(config.port, "/dev/ttyS3");
        assert_eq!(config.pwm_full_scale_ppm, 10000.0);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_json_round_trip() {
        let config = SensorConfig {
            packet_logging: true,
            frame_gap_ms: Some(20),
            ..SensorConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<SensorConfig>(&json).unwrap(), config);
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let config = SensorConfig {
            port: "/dev/ttyAMA0".to_string(),
            pwm_full_scale_ppm: 10000.0,
            ..SensorConfig::default()
        };
        let path = std::env::temp_dir().join("senseair_s8_config_test.yaml");
        std::fs::write(&path, config.to_yaml().unwrap()).unwrap();
        assert_eq!(SensorConfig::from_file(&path).unwrap(), config);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [("S8_PORT", "COM7"), ("S8_TIMEOUT_MS", "250")].into_iter().collect();
        let mut config = SensorConfig::default();
        config
            .apply_env_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.port, "COM7");
        assert_eq!(config.timeout_ms, 250);
        assert_eq!(config.baud_rate, 9600);

        let err = config
            .apply_env_overrides(|key| (key == "S8_BAUD_RATE").then(|| "fast".to_string()))
            .unwrap_err();
        assert!(matches!(err, SensorError::Configuration { .. }));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = SensorConfig::default();
        config.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = SensorConfig::default();
        config.port = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = SensorConfig::default();
        config.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = SensorConfig::default();
        config.pwm_full_scale_ppm = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_extension() {
        let path = std::env::temp_dir().join("senseair_s8_config_test.toml");
        std::fs::write(&path, "port = \"x\"").unwrap();
        let err = SensorConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, SensorError::Configuration { .. }));
        let _ = std::fs::remove_file(&path);
    }
}
