//! Configuration types

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::offsets::{OffsetDefinition, OffsetGroup};
use crate::pricing::CommissionSchedule;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
    /// Commission schedule versions and the hard floor
    #[serde(default)]
    pub commission: CommissionConfig,
    /// Offset definitions
    #[serde(default)]
    pub offsets: Vec<OffsetDefinition>,
    /// Offset groups
    #[serde(default)]
    pub groups: Vec<OffsetGroup>,
}

/// Commission configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommissionConfig {
    /// Base % used when no schedule rate resolves
    #[serde(default)]
    pub floor_rate_pct: Option<Decimal>,
    #[serde(default)]
    pub schedules: Vec<CommissionSchedule>,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Currency sale prices and ledger amounts are expressed in
    #[serde(default = "default_settlement_currency")]
    pub settlement_currency: String,
    /// How long a fetched FX rate stays cached
    #[serde(default = "default_fx_cache_ttl")]
    pub fx_cache_ttl_seconds: u64,
    /// Base URL of the FX rate service (optional)
    #[serde(default)]
    pub rate_service_url: Option<String>,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            settlement_currency: default_settlement_currency(),
            fx_cache_ttl_seconds: default_fx_cache_ttl(),
            rate_service_url: None,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_settlement_currency() -> String {
    "USD".to_string()
}

fn default_fx_cache_ttl() -> u64 {
    3600
}

fn default_request_timeout() -> u64 {
    30
}
