//! Configuration management for the engagement tracker.
//!
//! This module handles loading and validating configuration from environment
//! variables and configuration files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingField(String),

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Main configuration for the tracker.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Collector endpoint configuration
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Sampling loop configuration
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Enrollment retry policy
    #[serde(default)]
    pub enrollment: EnrollmentConfig,

    /// Replay capture source
    #[serde(default)]
    pub replay: ReplayConfig,

    /// Session tagging
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Collector endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Base URL of the collector's ingestion API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Sampling loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    /// Tick interval of the sampling loop in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Minimum interval before a same-emotion sample counts again, in
    /// milliseconds
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

/// Enrollment retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentConfig {
    /// When set, this label is enrolled from the classification source
    /// before tracking starts
    pub label: Option<String>,

    /// Bounded number of classification attempts before the fallback scan
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between attempts in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Maximum delay between attempts in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// Replay capture source configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplayConfig {
    /// Path of the JSON-lines observation capture to replay
    pub path: Option<PathBuf>,
}

/// Session tagging configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// When set, a collector session with this name is created at startup
    /// and all shipped events carry its id
    pub name: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_base_url() -> String {
    "http://localhost:4000".to_string()
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_interval_ms() -> u64 {
    300
}
fn default_throttle_ms() -> u64 {
    800
}
fn default_max_attempts() -> u32 {
    4
}
fn default_retry_base_delay_ms() -> u64 {
    250
}
fn default_retry_max_delay_ms() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            label: None,
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Later sources override earlier ones:
    /// 1. Config file (config/tracker.*)
    /// 2. Environment variables (prefixed with TRACKER__)
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/tracker").required(false))
            .add_source(
                Environment::with_prefix("TRACKER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.collector.base_url.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "collector.base_url".to_string(),
            ));
        }
        if !self.collector.base_url.starts_with("http://")
            && !self.collector.base_url.starts_with("https://")
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "collector.base_url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        if self.sampling.interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "sampling.interval_ms".to_string(),
                message: "Interval must be greater than 0".to_string(),
            });
        }

        if self.enrollment.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "enrollment.max_attempts".to_string(),
                message: "At least one attempt is required".to_string(),
            });
        }

        Ok(())
    }
}

impl CollectorConfig {
    /// Get request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl SamplingConfig {
    /// Get tick interval as Duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Get throttle window as Duration.
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

impl EnrollmentConfig {
    /// Get base retry delay as Duration.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Get maximum retry delay as Duration.
    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_interval_ms(), 300);
        assert_eq!(default_throttle_ms(), 800);
        assert_eq!(default_max_attempts(), 4);
    }

    #[test]
    fn test_default_config_validates() {
        let config = TrackerConfig {
            collector: CollectorConfig::default(),
            sampling: SamplingConfig::default(),
            enrollment: EnrollmentConfig::default(),
            replay: ReplayConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = TrackerConfig {
            collector: CollectorConfig::default(),
            sampling: SamplingConfig {
                interval_ms: 0,
                throttle_ms: 800,
            },
            enrollment: EnrollmentConfig::default(),
            replay: ReplayConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_http_base_url_is_rejected() {
        let config = TrackerConfig {
            collector: CollectorConfig {
                base_url: "ftp://collector".to_string(),
                request_timeout_ms: 5000,
            },
            sampling: SamplingConfig::default(),
            enrollment: EnrollmentConfig::default(),
            replay: ReplayConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(config.validate().is_err());
    }
}
