//! Configuration management for the POS back-office
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with PBO_ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Bearer token verification
    pub jwt: JwtConfig,

    /// Statement upload storage
    pub uploads: UploadConfig,

    /// Expiry alert windows
    pub expiry: ExpiryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret key the session collaborator signs tokens with
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    /// Directory uploaded bank statements are written to
    pub statement_dir: String,

    /// Largest accepted statement upload in bytes
    pub max_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpiryConfig {
    /// Alert window for batches created without one
    pub default_alert_days: i32,

    /// Days before expiry at which an alert becomes critical
    pub critical_days: i32,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("PBO_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("uploads.statement_dir", "uploads/statements")?
            .set_default("uploads.max_bytes", 10 * 1024 * 1024)?
            .set_default("expiry.default_alert_days", shared::DEFAULT_ALERT_DAYS_BEFORE)?
            .set_default("expiry.critical_days", 7)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (PBO_ prefix)
            .add_source(
                Environment::with_prefix("PBO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            default_alert_days: shared::DEFAULT_ALERT_DAYS_BEFORE,
            critical_days: 7,
        }
    }
}
