//! Trait definitions for external collaborators (sale feed, FX feed)

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::errors::Result;
use super::types::{Channel, Currency, Sale};

/// Source of point-in-time exchange rates
///
/// Implementations return the rate such that `1 base = rate quote`
/// on the given date. Validation of the upstream source is the
/// collaborator's concern.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FxRateSource: Send + Sync {
    /// Fetch the rate for a currency pair on a date
    async fn fetch_rate(&self, base: &Currency, quote: &Currency, date: NaiveDate) -> Result<Decimal>;

    /// Name of the feed, used in logs
    fn source_name(&self) -> &'static str;
}

/// Read access to validated sale history
///
/// Used by the reconciliation job and by the on-the-fly resume
/// strategy to see sales the ledger has not processed yet.
#[async_trait]
pub trait SaleHistory: Send + Sync {
    /// All sales on or after `from` settled through one of `channels`,
    /// in any order
    async fn sales_since(&self, from: NaiveDate, channels: &[Channel]) -> Result<Vec<Sale>>;
}
