//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables
//! and an optional `migrator.toml` file.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration source: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Tunables shared by every migration run.
///
/// Credentials never live here; they arrive with each run request.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Rows per destination transaction
    pub batch_size: usize,
    /// Seconds to wait for an endpoint to answer during connect
    pub connect_timeout_secs: u64,
    /// Connections per PostgreSQL pool
    pub pool_size: usize,
    /// ODBC driver name used for Oracle sources
    pub odbc_driver: String,
    /// Port assumed when an Oracle address omits one
    pub oracle_default_port: u16,
    /// Batches buffered between the source reader and the copier
    pub channel_capacity: usize,
    /// Finished runs kept in memory for polling
    pub max_retained_runs: usize,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            connect_timeout_secs: 15,
            pool_size: 4,
            odbc_driver: "Oracle 21 ODBC driver".to_string(),
            oracle_default_port: 1521,
            channel_capacity: 4,
            max_retained_runs: 50,
        }
    }
}

impl MigrationSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue("batch_size must be greater than 0".to_string()));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue("pool_size must be greater than 0".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "channel_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub migration: MigrationSettings,
}

impl Settings {
    /// Load settings from the environment, `.env` and `migrator.toml`
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let server = ServerConfig {
            host: std::env::var("HOST")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().port),
        };

        let cors = CorsConfig {
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let migration = Self::load_migration_settings()?;

        Ok(Self {
            server,
            cors,
            migration,
        })
    }

    /// Layer `migrator.toml` and `MIGRATOR_*` variables over the defaults
    fn load_migration_settings() -> Result<MigrationSettings, ConfigError> {
        let raw = config::Config::builder()
            .add_source(config::File::with_name("migrator").required(false))
            .add_source(config::Environment::with_prefix("MIGRATOR").try_parsing(true))
            .build()?;

        let settings: MigrationSettings = raw.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}
