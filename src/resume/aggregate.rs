use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::common::errors::{LedgerError, Result};
use crate::ledger::{ConsumptionRecord, LedgerDelta, Totals};
use crate::offsets::{CapTarget, Caps};

/// Rolled-up consumption of one cap target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeAggregate {
    pub target: CapTarget,
    pub records: u64,
    pub units: u64,
    /// Settlement currency
    pub amount: Decimal,
    pub amount_usd: Decimal,
    pub last_sale_at: Option<DateTime<Utc>>,
    pub exhausted: bool,
    pub exhausted_at: Option<DateTime<Utc>>,
}

impl ResumeAggregate {
    pub fn empty(target: CapTarget) -> Self {
        Self {
            target,
            records: 0,
            units: 0,
            amount: Decimal::ZERO,
            amount_usd: Decimal::ZERO,
            last_sale_at: None,
            exhausted: false,
            exhausted_at: None,
        }
    }

    /// Sum records given in ledger order
    pub fn from_records<'a>(
        target: CapTarget,
        caps: &Caps,
        records: impl IntoIterator<Item = &'a ConsumptionRecord>,
    ) -> Self {
        let mut aggregate = Self::empty(target);
        let mut running = Totals::default();
        for record in records {
            running.add(record.quantity, record.amount, record.amount_usd);
            aggregate.records += 1;
            aggregate.last_sale_at = Some(record.sale_timestamp);
            if aggregate.exhausted_at.is_none() && running.reaches(caps) {
                aggregate.exhausted_at = Some(record.sale_timestamp);
            }
        }
        aggregate.units = running.units;
        aggregate.amount = running.amount;
        aggregate.amount_usd = running.amount_usd;
        aggregate.exhausted = aggregate.exhausted_at.is_some();
        aggregate
    }

    /// Fold one ledger write into the aggregate
    pub fn apply_delta(
        &mut self,
        delta: &LedgerDelta,
        last_sale_at: Option<DateTime<Utc>>,
        exhausted_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.records = self.records.checked_add_signed(delta.records).ok_or_else(|| {
            LedgerError::Internal(format!("{}: record count underflow", self.target))
        })?;
        self.units = self.units.checked_add_signed(delta.units).ok_or_else(|| {
            LedgerError::Internal(format!("{}: unit total underflow", self.target))
        })?;
        self.amount += delta.amount;
        self.amount_usd += delta.amount_usd;
        self.last_sale_at = last_sale_at;
        self.exhausted = exhausted_at.is_some();
        self.exhausted_at = exhausted_at;
        Ok(())
    }

    /// Same aggregate with decimals stripped of trailing zeros
    pub fn canonical(&self) -> Self {
        Self {
            amount: self.amount.normalize(),
            amount_usd: self.amount_usd.normalize(),
            ..self.clone()
        }
    }

    /// SHA-256 of the canonical JSON encoding, hex encoded
    pub fn digest(&self) -> Result<String> {
        let bytes = serde_json::to_vec(&self.canonical())?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}
