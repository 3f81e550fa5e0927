//! Shared domain types used across pricing, offsets and the ledger

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::{LedgerError, Result};

/// ISO-4217 style currency code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_uppercase())
    }

    /// Reference currency for monetary caps
    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time exchange rate: `1 base = rate quote`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FxSnapshot {
    pub base: Currency,
    pub quote: Currency,
    pub rate: Decimal,
    pub as_of: NaiveDate,
}

impl FxSnapshot {
    pub fn new(base: Currency, quote: Currency, rate: Decimal, as_of: NaiveDate) -> Self {
        Self {
            base,
            quote,
            rate,
            as_of,
        }
    }

    /// Identity snapshot for amounts already in their target currency
    pub fn identity(currency: Currency, as_of: NaiveDate) -> Self {
        Self::new(currency.clone(), currency, Decimal::ONE, as_of)
    }

    /// Convert `value` from `from` into `to` using this snapshot, in either direction
    pub fn convert(&self, value: Decimal, from: &Currency, to: &Currency) -> Option<Decimal> {
        if from == to {
            return Some(value);
        }
        if &self.base == from && &self.quote == to {
            return Some(value * self.rate);
        }
        if &self.quote == from && &self.base == to && !self.rate.is_zero() {
            return Some(value / self.rate);
        }
        None
    }
}

/// An amount together with the FX snapshot it was recorded under
///
/// Immutable once recorded: normalization never refreshes the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonetaryAmount {
    pub value: Decimal,
    pub currency: Currency,
    pub fx: FxSnapshot,
}

impl MonetaryAmount {
    pub fn new(value: Decimal, currency: Currency, fx: FxSnapshot) -> Self {
        Self {
            value,
            currency,
            fx,
        }
    }

    /// Amount already denominated in settlement currency
    pub fn settled(value: Decimal, currency: Currency, as_of: NaiveDate) -> Self {
        let fx = FxSnapshot::identity(currency.clone(), as_of);
        Self::new(value, currency, fx)
    }

    /// Value expressed in `target`, at this amount's own snapshot
    pub fn in_currency(&self, target: &Currency) -> Result<Decimal> {
        self.fx
            .convert(self.value, &self.currency, target)
            .ok_or_else(|| {
                LedgerError::CurrencyMismatch(format!(
                    "{} {} cannot be expressed in {} with snapshot {}/{}",
                    self.value, self.currency, target, self.fx.base, self.fx.quote
                ))
            })
    }
}

/// Sales channel a sale was settled through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Marketplace,
    Direct,
    Storefront,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Marketplace => write!(f, "marketplace"),
            Channel::Direct => write!(f, "direct"),
            Channel::Storefront => write!(f, "storefront"),
        }
    }
}

/// Per-channel applicability flags for offsets and groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFlags {
    #[serde(default = "default_true")]
    pub marketplace: bool,
    #[serde(default)]
    pub direct: bool,
    #[serde(default)]
    pub storefront: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ChannelFlags {
    fn default() -> Self {
        Self {
            marketplace: true,
            direct: false,
            storefront: false,
        }
    }
}

impl ChannelFlags {
    pub fn all() -> Self {
        Self {
            marketplace: true,
            direct: true,
            storefront: true,
        }
    }

    pub fn allows(&self, channel: Channel) -> bool {
        match channel {
            Channel::Marketplace => self.marketplace,
            Channel::Direct => self.direct,
            Channel::Storefront => self.storefront,
        }
    }

    /// Enabled channels in a stable order
    pub fn channels(&self) -> Vec<Channel> {
        [Channel::Marketplace, Channel::Direct, Channel::Storefront]
            .into_iter()
            .filter(|c| self.allows(*c))
            .collect()
    }
}

/// Catalog attributes an offset scope is matched against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeAttributes {
    pub brand: String,
    pub category: String,
    pub subcategory: String,
    pub item: String,
}

/// A sale's share of one shipment's cost
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentShare {
    /// Shipment cost, VAT-inclusive, settlement currency
    pub cost: Decimal,
    /// Line items sharing the shipment
    #[serde(default = "default_pack_size")]
    pub items_in_pack: u32,
}

fn default_pack_size() -> u32 {
    1
}

/// Sale identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaleId(pub String);

impl SaleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for SaleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A settled sale line as delivered by the sale feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub timestamp: DateTime<Utc>,
    pub channel: Channel,
    pub scope: ScopeAttributes,
    /// Listing type / price list the commission rate is keyed by
    pub price_list: String,
    pub quantity: u32,
    /// VAT-inclusive unit price in settlement currency
    pub gross_unit_price: Decimal,
    /// VAT as a percentage (21 = 21%)
    pub vat_pct: Decimal,
    /// Unit cost before VAT, with the FX snapshot it was recorded under
    pub unit_cost: MonetaryAmount,
    #[serde(default)]
    pub shipping: Option<ShipmentShare>,
    /// The sale's own USD snapshot, used for monetary caps
    pub usd_fx: FxSnapshot,
}

impl Sale {
    /// Calendar date of the sale (UTC)
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }

    /// Total VAT-inclusive amount of the line
    pub fn gross_amount(&self) -> Decimal {
        self.gross_unit_price * Decimal::from(self.quantity)
    }

    /// Ordering key used by the ledger
    pub fn order_key(&self) -> (DateTime<Utc>, SaleId) {
        (self.timestamp, self.id.clone())
    }

    /// Convert a settlement-currency amount to USD at this sale's snapshot
    pub fn to_usd(&self, amount: Decimal, settlement: &Currency) -> Result<Decimal> {
        self.usd_fx
            .convert(amount, settlement, &Currency::usd())
            .ok_or_else(|| {
                LedgerError::CurrencyMismatch(format!(
                    "sale {} snapshot {}/{} cannot convert {} to USD",
                    self.id, self.usd_fx.base, self.usd_fx.quote, settlement
                ))
            })
    }
}
