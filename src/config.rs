//! Configuration for duttest.
//!
//! Settings are read from `~/.duttest/config.toml`; command-line flags
//! override them. Every key is optional:
//!
//! ```toml
//! port = "/dev/ttyACM0"
//! baud = 115200
//! timeout_ms = 2000     # bound on a single line read
//! settle_ms = 200       # pause after each command
//! suite = "demo"        # control, gpio, adc, demo
//! log_level = "info"    # RUST_LOG overrides this
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::serial::{SerialConfig, DEFAULT_BAUD, DEFAULT_PORT, DEFAULT_TIMEOUT};
use crate::core::session::DEFAULT_SETTLE;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: &'static str },
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial device path or COM port
    pub port: String,
    pub baud: u32,
    pub timeout_ms: u64,
    pub settle_ms: u64,
    /// Built-in suite to run when no script file is given
    pub suite: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud: DEFAULT_BAUD,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            settle_ms: DEFAULT_SETTLE.as_millis() as u64,
            suite: "demo".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load the user config, falling back to defaults when there is none
    pub fn load() -> Result<Self, ConfigError> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the session cannot run with.
    ///
    /// A zero read timeout turns every read into an immediate timeout and
    /// leaves the reader spinning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "timeout_ms",
                reason: "must be greater than zero",
            });
        }
        if self.baud == 0 {
            return Err(ConfigError::Invalid {
                key: "baud",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    pub fn serial(&self) -> SerialConfig {
        SerialConfig {
            port: self.port.clone(),
            baud: self.baud,
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    fn config_path() -> Option<PathBuf> {
        data_dir().map(|dir| dir.join("config.toml"))
    }

    /// Log file location, creating its directory if needed
    pub fn log_path() -> Option<PathBuf> {
        let dir = data_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir).ok()?;
        }
        Some(dir.join("duttest.log"))
    }
}

fn data_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".duttest"))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_tool() {
        let config = Config::default();
        assert_eq!(config.baud, 115_200);
        assert_eq!(config.timeout_ms, 2000);
        assert_eq!(config.settle_ms, 200);
        assert_eq!(config.serial().timeout, Duration::from_secs(2));
        assert_eq!(config.settle(), Duration::from_millis(200));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str("port = \"/dev/ttyUSB1\"\nbaud = 460800\n").unwrap();
        assert_eq!(config.port, "/dev/ttyUSB1");
        assert_eq!(config.baud, 460_800);
        assert_eq!(config.suite, "demo");
        assert_eq!(config.settle_ms, 200);
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = Config {
            suite: "gpio".to_string(),
            ..Config::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(toml::from_str::<Config>(&text).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::load_from(Path::new("/nonexistent/duttest/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        assert!(Config::default().validate().is_ok());

        let config: Config = toml::from_str("timeout_ms = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "timeout_ms", .. }));
        assert_eq!(err.to_string(), "Invalid setting timeout_ms: must be greater than zero");

        let config = Config {
            baud: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { key: "baud", .. })));
    }

    #[test]
    fn test_load_rejects_zero_timeout() {
        let dir = std::env::temp_dir().join(format!("duttest-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        fs::write(&path, "timeout_ms = 0\n").unwrap();

        let result = Config::load_from(&path);
        fs::remove_dir_all(&dir).unwrap();
        assert!(matches!(result, Err(ConfigError::Invalid { key: "timeout_ms", .. })));
    }
}
