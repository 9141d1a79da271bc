//! Server configuration module.
//!
//! Configuration for the patch log server is read from environment
//! variables.
//!
//! # Environment Variables
//!
//! - `DELTA_BASE`: Root directory of the server area (default: `./DeltaServer`)
//! - `DELTA_PORT`: Port to listen on (default: `1066`)
//! - `DELTA_LOG_TYPE`: Provider for new data sources, `file`, `mem` or `zk` (default: `file`)
//! - `DELTA_PATCH_CACHE_SIZE`: Decoded patches cached per log (default: `1000`)
//! - `DELTA_LOCK_TIMEOUT_MS`: Coordination lock timeout in milliseconds (default: `10000`)
//!
//! # Invariants
//!
//! - `listen_port` is always a valid port number (1-65535)
//! - `patch_cache_size` is greater than zero
//! - `log_type` names one of the built-in providers

use std::path::PathBuf;
use std::time::Duration;

use crate::provider::{PROVIDER_FILE, PROVIDER_MEM, PROVIDER_ZK};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Root of the server area. Each file-backed data source has a
    /// directory `{base_directory}/{name}`.
    pub base_directory: PathBuf,
    /// Port to listen on for HTTP requests.
    pub listen_port: u16,
    /// Provider used when a create request names none.
    pub log_type: String,
    /// Capacity of each log's patch cache.
    pub patch_cache_size: usize,
    /// How long an append waits for the coordination lock.
    pub lock_timeout: Duration,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable is missing.
    MissingEnvVar(String),
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEnvVar(name) => {
                write!(f, "missing required environment variable: {name}")
            }
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_directory: PathBuf::from(Self::DEFAULT_BASE_DIRECTORY),
            listen_port: Self::DEFAULT_PORT,
            log_type: Self::DEFAULT_LOG_TYPE.to_string(),
            patch_cache_size: Self::DEFAULT_PATCH_CACHE_SIZE,
            lock_timeout: Duration::from_millis(Self::DEFAULT_LOCK_TIMEOUT_MS),
        }
    }
}

impl ServerConfig {
    /// Default port for the server.
    pub const DEFAULT_PORT: u16 = 1066;
    /// Default server area.
    pub const DEFAULT_BASE_DIRECTORY: &'static str = "./DeltaServer";
    /// Default provider for new data sources.
    pub const DEFAULT_LOG_TYPE: &'static str = PROVIDER_FILE;
    /// Default capacity of each log's patch cache.
    pub const DEFAULT_PATCH_CACHE_SIZE: usize = 1000;
    /// Default coordination lock timeout.
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to a value that does not parse
    /// or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_directory = lookup("DELTA_BASE")
            .map_or_else(|| PathBuf::from(Self::DEFAULT_BASE_DIRECTORY), PathBuf::from);
        let listen_port = Self::load_listen_port(lookup("DELTA_PORT"))?;
        let log_type = Self::load_log_type(lookup("DELTA_LOG_TYPE"))?;
        let patch_cache_size = Self::load_cache_size(lookup("DELTA_PATCH_CACHE_SIZE"))?;
        let lock_timeout = Self::load_lock_timeout(lookup("DELTA_LOCK_TIMEOUT_MS"))?;

        Ok(Self {
            base_directory,
            listen_port,
            log_type,
            patch_cache_size,
            lock_timeout,
        })
    }

    /// Parse the listen port, or the default if not set.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is set but not a valid port number.
    fn load_listen_port(value: Option<String>) -> Result<u16, ConfigError> {
        match value {
            Some(value) => match value.parse::<u16>() {
                Ok(port) if port > 0 => Ok(port),
                _ => Err(ConfigError::InvalidValue {
                    name: "DELTA_PORT".to_string(),
                    message: format!("'{value}' is not a valid port number (must be 1-65535)"),
                }),
            },
            None => Ok(Self::DEFAULT_PORT),
        }
    }

    fn load_log_type(value: Option<String>) -> Result<String, ConfigError> {
        let Some(value) = value else {
            return Ok(Self::DEFAULT_LOG_TYPE.to_string());
        };
        let normalized = value.trim().to_ascii_lowercase();
        if [PROVIDER_FILE, PROVIDER_MEM, PROVIDER_ZK].contains(&normalized.as_str()) {
            Ok(normalized)
        } else {
            Err(ConfigError::InvalidValue {
                name: "DELTA_LOG_TYPE".to_string(),
                message: format!("'{value}' is not one of file, mem, zk"),
            })
        }
    }

    /// Parse the cache size, or the default if not set.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a positive integer.
    fn load_cache_size(value: Option<String>) -> Result<usize, ConfigError> {
        match value {
            Some(value) => match value.parse::<usize>() {
                Ok(size) if size > 0 => Ok(size),
                _ => Err(ConfigError::InvalidValue {
                    name: "DELTA_PATCH_CACHE_SIZE".to_string(),
                    message: format!("'{value}' is not a positive integer"),
                }),
            },
            None => Ok(Self::DEFAULT_PATCH_CACHE_SIZE),
        }
    }

    fn load_lock_timeout(value: Option<String>) -> Result<Duration, ConfigError> {
        match value {
            Some(value) => value
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidValue {
                    name: "DELTA_LOCK_TIMEOUT_MS".to_string(),
                    message: format!("'{value}' is not a number of milliseconds"),
                }),
            None => Ok(Duration::from_millis(Self::DEFAULT_LOCK_TIMEOUT_MS)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_values() {
        assert_eq!(ServerConfig::DEFAULT_PORT, 1066);
        assert_eq!(ServerConfig::DEFAULT_BASE_DIRECTORY, "./DeltaServer");
        assert_eq!(load(&[]).expect("defaults"), ServerConfig::default());
    }

    #[test]
    fn test_values_from_environment() {
        let config = load(&[
            ("DELTA_BASE", "/srv/delta"),
            ("DELTA_PORT", "8080"),
            ("DELTA_LOG_TYPE", "MEM"),
            ("DELTA_PATCH_CACHE_SIZE", "5"),
            ("DELTA_LOCK_TIMEOUT_MS", "250"),
        ])
        .expect("config");
        assert_eq!(config.base_directory, PathBuf::from("/srv/delta"));
        assert_eq!(config.listen_port, 8080);
        assert_eq!(config.log_type, "mem");
        assert_eq!(config.patch_cache_size, 5);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values() {
        for (name, value) in [
            ("DELTA_PORT", "0"),
            ("DELTA_PORT", "http"),
            ("DELTA_LOG_TYPE", "s3"),
            ("DELTA_PATCH_CACHE_SIZE", "0"),
            ("DELTA_LOCK_TIMEOUT_MS", "-1"),
        ] {
            match load(&[(name, value)]) {
                Err(ConfigError::InvalidValue { name: got, .. }) => assert_eq!(got, name),
                other => panic!("{name}={value}: expected invalid value, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_config_error_display_missing() {
        let error = ConfigError::MissingEnvVar("TEST_VAR".to_string());
        assert_eq!(
            error.to_string(),
            "missing required environment variable: TEST_VAR"
        );
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
