//! Ordered consumption book for a single cap target

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::allocation::{apply_caps, Totals};
use super::record::{ConsumptionRecord, LedgerEntry, LedgerKey};
use crate::common::errors::{LedgerError, Result};
use crate::common::types::SaleId;
use crate::offsets::{CapTarget, Caps};
use crate::resume::ResumeAggregate;

/// Signed change to a target's aggregate caused by one upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerDelta {
    pub records: i64,
    pub units: i64,
    pub amount: Decimal,
    pub amount_usd: Decimal,
}

impl LedgerDelta {
    pub fn is_zero(&self) -> bool {
        self.records == 0 && self.units == 0 && self.amount.is_zero() && self.amount_usd.is_zero()
    }
}

/// Result of writing an entry into the book
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    /// Identical claim already recorded
    Unchanged(ConsumptionRecord),
    Applied {
        record: ConsumptionRecord,
        delta: LedgerDelta,
        /// Later records whose allocation was recomputed
        replayed: usize,
    },
}

impl Upsert {
    pub fn record(&self) -> &ConsumptionRecord {
        match self {
            Upsert::Unchanged(record) => record,
            Upsert::Applied { record, .. } => record,
        }
    }
}

/// Consumption records of one target in (sale timestamp, sale id) order
///
/// Allocations always reflect the records before them. Inserting a sale
/// in the past recomputes everything after it from the stored nominals.
#[derive(Debug, Clone)]
pub struct TargetLedger {
    target: CapTarget,
    caps: Caps,
    records: BTreeMap<LedgerKey, ConsumptionRecord>,
    positions: HashMap<SaleId, DateTime<Utc>>,
    totals: Totals,
    exhausted_at: Option<LedgerKey>,
}

impl TargetLedger {
    pub fn new(target: CapTarget, caps: Caps) -> Self {
        Self {
            target,
            caps,
            records: BTreeMap::new(),
            positions: HashMap::new(),
            totals: Totals::default(),
            exhausted_at: None,
        }
    }

    /// Rebuild a book from previously persisted records
    ///
    /// Allocations are recomputed against the current caps.
    pub fn from_records(target: CapTarget, caps: Caps, records: impl IntoIterator<Item = ConsumptionRecord>) -> Self {
        let mut book = Self::new(target, caps);
        for record in records.into_iter().filter(|r| r.target == book.target) {
            book.positions.insert(record.sale_id.clone(), record.sale_timestamp);
            book.records.insert(record.key(), record);
        }
        if let Some(first) = book.records.keys().next().cloned() {
            book.replay_from(&first);
        }
        book.totals = book.sum_range(None);
        book
    }

    pub fn target(&self) -> &CapTarget {
        &self.target
    }

    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ConsumptionRecord> {
        self.records.values()
    }

    pub fn record(&self, sale_id: &SaleId) -> Option<&ConsumptionRecord> {
        self.positions
            .get(sale_id)
            .and_then(|ts| self.records.get(&(*ts, sale_id.clone())))
    }

    pub fn contains(&self, sale_id: &SaleId) -> bool {
        self.positions.contains_key(sale_id)
    }

    /// Timestamp of the sale that exhausted a cap
    pub fn exhausted_at(&self) -> Option<DateTime<Utc>> {
        self.exhausted_at.as_ref().map(|(ts, _)| *ts)
    }

    pub fn last_sale_at(&self) -> Option<DateTime<Utc>> {
        self.records.keys().next_back().map(|(ts, _)| *ts)
    }

    /// Record or amend a sale's claim
    pub fn upsert(&mut self, entry: LedgerEntry) -> Result<Upsert> {
        let new_key = entry.key();
        let old_key = self
            .positions
            .get(&entry.sale_id)
            .map(|ts| (*ts, entry.sale_id.clone()));

        if let Some(existing) = old_key.as_ref().and_then(|k| self.records.get(k)) {
            if existing.same_claim(&entry) {
                return Ok(Upsert::Unchanged(existing.clone()));
            }
        }

        let start = match &old_key {
            Some(old) if *old < new_key => old.clone(),
            _ => new_key.clone(),
        };
        let before = self.sum_range(Some(&start));
        let count_before = self.records.range(start.clone()..).count();

        let mut record = ConsumptionRecord::pending(self.target.clone(), entry);
        if let Some(old) = old_key {
            if let Some(previous) = self.records.remove(&old) {
                record.recorded_at = previous.recorded_at;
            }
        }
        self.positions.insert(record.sale_id.clone(), record.sale_timestamp);
        self.records.insert(new_key.clone(), record);

        let replayed = self.replay_from(&start);
        let after = self.sum_range(Some(&start));
        let count_after = self.records.range(start..).count();

        let delta = LedgerDelta {
            records: count_after as i64 - count_before as i64,
            units: after.units as i64 - before.units as i64,
            amount: after.amount - before.amount,
            amount_usd: after.amount_usd - before.amount_usd,
        };
        self.totals.units = self.totals.units.saturating_add_signed(delta.units);
        self.totals.amount += delta.amount;
        self.totals.amount_usd += delta.amount_usd;

        let record = self.records.get(&new_key).cloned().ok_or_else(|| {
            LedgerError::Internal(format!("{}: record {} vanished during replay", self.target, new_key.1))
        })?;
        debug!(
            "{}: upsert {} replayed {} later record(s)",
            self.target,
            new_key.1,
            replayed.saturating_sub(1)
        );
        Ok(Upsert::Applied {
            record,
            delta,
            replayed: replayed.saturating_sub(1),
        })
    }

    /// Aggregate derived from the incrementally maintained totals
    pub fn aggregate(&self) -> ResumeAggregate {
        ResumeAggregate {
            target: self.target.clone(),
            records: self.records.len() as u64,
            units: self.totals.units,
            amount: self.totals.amount,
            amount_usd: self.totals.amount_usd,
            last_sale_at: self.last_sale_at(),
            exhausted: self.exhausted_at.is_some(),
            exhausted_at: self.exhausted_at(),
        }
    }

    /// Recompute allocations from `start` onward; returns how many records were touched
    fn replay_from(&mut self, start: &LedgerKey) -> usize {
        let mut running = self.sum_range_before(start);
        if self.exhausted_at.as_ref().is_some_and(|k| k >= start) {
            self.exhausted_at = None;
        }

        let mut touched = 0;
        for (key, record) in self.records.range_mut(start.clone()..) {
            let allocation = apply_caps(&record.rule, &record.nominal, &running, &self.caps);
            record.apply(allocation);
            running.add(record.quantity, record.amount, record.amount_usd);
            if self.exhausted_at.is_none() && running.reaches(&self.caps) {
                self.exhausted_at = Some(key.clone());
            }
            touched += 1;
        }
        touched
    }

    fn sum_range_before(&self, end: &LedgerKey) -> Totals {
        let mut totals = Totals::default();
        for record in self.records.range(..end.clone()).map(|(_, r)| r) {
            totals.add(record.quantity, record.amount, record.amount_usd);
        }
        totals
    }

    /// Totals from `start` to the end, or of the whole book
    fn sum_range(&self, start: Option<&LedgerKey>) -> Totals {
        let mut totals = Totals::default();
        let records: Box<dyn Iterator<Item = &ConsumptionRecord>> = match start {
            Some(start) => Box::new(self.records.range(start.clone()..).map(|(_, r)| r)),
            None => Box::new(self.records.values()),
        };
        for record in records {
            totals.add(record.quantity, record.amount, record.amount_usd);
        }
        totals
    }
}
