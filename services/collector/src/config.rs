use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the collector service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Storage backend configuration
    #[serde(default)]
    pub store: StoreConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Storage backend configuration
///
/// The managed PostgreSQL backend is selected when a database credential
/// resolves at startup; otherwise the service runs against the local JSON
/// data file. Running without any credential is a first-class mode, not a
/// degraded one.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Inline PostgreSQL connection URL. Takes precedence over
    /// `database_url_file` when both are set.
    pub database_url: Option<String>,
    /// Path to a file whose trimmed contents are the connection URL
    pub database_url_file: Option<String>,
    /// Path of the local JSON data file used by the file backend
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup (PostgreSQL backend only)
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// API configuration for the ingestion endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "aula-collector".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_data_file() -> PathBuf {
    PathBuf::from("telemetry.json")
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    4000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "aula-collector")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(
                config::File::with_name("config/collector")
                    .required(false)
            )
            .add_source(
                config::File::with_name("/etc/aula/collector")
                    .required(false)
            )
            // Override with environment variables
            // COLLECTOR__STORE__DATABASE_URL -> store.database_url
            .add_source(
                config::Environment::with_prefix("COLLECTOR")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get database connection timeout as Duration
    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.store.connect_timeout_secs)
    }

    /// Get database idle timeout as Duration
    pub fn db_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.store.idle_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_url_file: None,
            data_file: default_data_file(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: default_run_migrations(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_api_port(), 4000);
        assert_eq!(default_data_file(), PathBuf::from("telemetry.json"));
        assert!(default_run_migrations());
    }

    #[test]
    fn test_store_config_defaults_to_file_backend() {
        let store = StoreConfig::default();
        assert!(store.database_url.is_none());
        assert!(store.database_url_file.is_none());
    }
}
