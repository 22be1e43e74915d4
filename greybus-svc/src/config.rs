//! SVC configuration.

use crate::protocol::{DEVICE_ID_BAD, DEVICE_ID_MODULES_START, SVC_VERSION_MAJOR, SVC_VERSION_MINOR};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Errors loading or validating a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for one SVC instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Host bus number, used to name the SVC (`<bus_id>-svc`).
    pub bus_id: u32,
    /// Highest major protocol version we accept and report.
    pub version_major: u8,
    pub version_minor: u8,
    /// First device id handed out to modules.
    pub device_id_start: u8,
    /// First device id that is never handed out.
    pub device_id_bad: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus_id: 1,
            version_major: SVC_VERSION_MAJOR,
            version_minor: SVC_VERSION_MINOR,
            device_id_start: DEVICE_ID_MODULES_START,
            device_id_bad: DEVICE_ID_BAD,
        }
    }
}

impl Config {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id_start < DEVICE_ID_MODULES_START {
            return Err(ConfigError::Invalid(format!(
                "device_id_start {} overlaps the reserved SVC/AP ids",
                self.device_id_start
            )));
        }
        if self.device_id_start >= self.device_id_bad {
            return Err(ConfigError::Invalid(format!(
                "empty device id range [{}, {})",
                self.device_id_start, self.device_id_bad
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.device_id_start, 2);
        assert_eq!(config.device_id_bad, 0xff);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "bus_id": 3, "device_id_bad": 16 }}"#).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.bus_id, 3);
        assert_eq!(config.device_id_bad, 16);
        assert_eq!(config.version_major, SVC_VERSION_MAJOR);
    }

    #[test]
    fn test_reserved_ids_rejected() {
        let config = Config {
            device_id_start: 1,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            device_id_start: 8,
            device_id_bad: 8,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "bus": 3 }}"#).unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
