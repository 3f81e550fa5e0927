use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::allocation::{Allocation, AllocationOutcome, BindingCap, Nominal};
use crate::common::errors::{LedgerError, Result};
use crate::common::types::{Currency, Sale, SaleId};
use crate::offsets::{AmountRule, CapTarget, MatchSource, MatchedOffset};

/// Position of a record in a target's ledger
pub type LedgerKey = (DateTime<Utc>, SaleId);

/// A sale's uncapped claim on one cap target
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub sale_id: SaleId,
    pub sale_timestamp: DateTime<Utc>,
    pub source: MatchSource,
    pub rule: AmountRule,
    pub nominal: Nominal,
}

impl LedgerEntry {
    /// Price a matched offset against a sale
    ///
    /// The unit cost is taken net of VAT in settlement currency using the
    /// cost's own snapshot; USD uses the sale's snapshot.
    pub fn from_sale(sale: &Sale, matched: &MatchedOffset, settlement: &Currency) -> Result<Self> {
        let unit_cost_net = sale.unit_cost.in_currency(settlement)?;
        let quantity = u64::from(sale.quantity);
        let amount = matched.rule.nominal(quantity, unit_cost_net);
        let amount_usd = sale.to_usd(amount, settlement)?;
        let fx_rate = sale
            .usd_fx
            .convert(Decimal::ONE, &Currency::usd(), settlement)
            .ok_or_else(|| {
                LedgerError::CurrencyMismatch(format!(
                    "sale {} has no USD/{} snapshot",
                    sale.id, settlement
                ))
            })?;

        Ok(Self {
            sale_id: sale.id.clone(),
            sale_timestamp: sale.timestamp,
            source: matched.source.clone(),
            rule: matched.rule,
            nominal: Nominal {
                quantity,
                amount,
                amount_usd,
                fx_rate,
            },
        })
    }

    pub fn key(&self) -> LedgerKey {
        (self.sale_timestamp, self.sale_id.clone())
    }
}

/// Persisted consumption of one sale against one cap target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionRecord {
    pub sale_id: SaleId,
    pub target: CapTarget,
    pub source: MatchSource,
    pub rule: AmountRule,
    pub sale_timestamp: DateTime<Utc>,
    pub nominal: Nominal,
    pub quantity: u64,
    /// Settlement currency
    pub amount: Decimal,
    pub amount_usd: Decimal,
    pub outcome: AllocationOutcome,
    #[serde(default)]
    pub binding: Option<BindingCap>,
    pub recorded_at: DateTime<Utc>,
}

impl ConsumptionRecord {
    pub(crate) fn pending(target: CapTarget, entry: LedgerEntry) -> Self {
        Self {
            sale_id: entry.sale_id,
            target,
            source: entry.source,
            rule: entry.rule,
            sale_timestamp: entry.sale_timestamp,
            nominal: entry.nominal,
            quantity: 0,
            amount: Decimal::ZERO,
            amount_usd: Decimal::ZERO,
            outcome: AllocationOutcome::Zero,
            binding: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn key(&self) -> LedgerKey {
        (self.sale_timestamp, self.sale_id.clone())
    }

    /// Same claim as an incoming entry; re-applying it is a no-op
    pub fn same_claim(&self, entry: &LedgerEntry) -> bool {
        self.sale_timestamp == entry.sale_timestamp
            && self.source == entry.source
            && self.rule == entry.rule
            && self.nominal == entry.nominal
    }

    /// Whether the cap cut this record short
    pub fn cap_exceeded(&self) -> bool {
        self.outcome != AllocationOutcome::Full
    }

    pub(crate) fn apply(&mut self, allocation: Allocation) {
        self.quantity = allocation.quantity;
        self.amount = allocation.amount;
        self.amount_usd = allocation.amount_usd;
        self.outcome = allocation.outcome;
        self.binding = allocation.binding;
    }
}
