//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;
use tracing::debug;

use super::types::AppConfig;
use crate::common::errors::{LedgerError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP__, e.g. APP__SETTINGS__LOG_LEVEL)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            debug!("Loading configuration from {}", path);
            builder = builder.add_source(File::with_name(path).required(false));
        } else {
            debug!("Configuration file {} not found, using defaults", path);
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| LedgerError::Configuration(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| LedgerError::Configuration(e.to_string()))
}

/// Load configuration from environment variables only
///
/// Reads a `.env` file first when present.
pub fn load_from_env() -> Result<AppConfig> {
    dotenvy::dotenv().ok();
    load_config(None)
}
