//! Error types for the ledger and pricing engines

use thiserror::Error;

/// Result type alias using our LedgerError
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Main error type for pricing, ledger and reconciliation operations
#[derive(Error, Debug)]
pub enum LedgerError {
    /// No commission schedule (or floor) resolves for a sale
    #[error("No commission schedule resolves for {scope} on {date}")]
    SchemaGap { scope: String, date: chrono::NaiveDate },

    /// Goal-seek could not find a valid price
    #[error("Price solver did not converge: {0}")]
    NoConvergence(String),

    /// Offset, group or schedule rejected at definition time
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// A ledger write raced a reconciliation rebuild on the same target
    #[error("Concurrent modification of {0}: rebuild in progress")]
    ConcurrentModification(String),

    /// No FX rate available for a currency pair and date
    #[error("FX rate unavailable for {base}/{quote} on {date}")]
    FxRateUnavailable {
        base: String,
        quote: String,
        date: chrono::NaiveDate,
    },

    /// An amount's FX snapshot cannot convert it to the requested currency
    #[error("Currency mismatch: {0}")]
    CurrencyMismatch(String),

    /// Offset or group id not registered
    #[error("Unknown offset target: {0}")]
    UnknownTarget(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid response from a collaborator feed
    #[error("Invalid feed response: {0}")]
    InvalidResponse(String),

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<url::ParseError> for LedgerError {
    fn from(err: url::ParseError) -> Self {
        LedgerError::Configuration(err.to_string())
    }
}
