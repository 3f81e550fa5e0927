use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

use super::book::{TargetLedger, Upsert};
use super::record::{ConsumptionRecord, LedgerEntry};
use crate::common::errors::{LedgerError, Result};
use crate::common::traits::SaleHistory;
use crate::common::types::{Currency, Sale, SaleId};
use crate::offsets::{CapTarget, MatchedOffset, OffsetRegistry};
use crate::resume::AggregateStore;

/// Lock and rebuild flag for one cap target
#[derive(Debug)]
pub(crate) struct TargetSlot {
    book: Arc<Mutex<TargetLedger>>,
    rebuilding: AtomicBool,
}

/// Exclusive hold on a target for the duration of a rebuild
///
/// Writers arriving meanwhile see the flag, report a concurrent
/// modification and queue behind the lock. Dropping the guard clears the
/// flag before the lock is released.
pub(crate) struct RebuildGuard {
    slot: Arc<TargetSlot>,
    book: OwnedMutexGuard<TargetLedger>,
}

impl RebuildGuard {
    pub(crate) fn book(&self) -> &TargetLedger {
        &self.book
    }

    pub(crate) fn replace(&mut self, book: TargetLedger) {
        *self.book = book;
    }
}

impl Drop for RebuildGuard {
    fn drop(&mut self) {
        self.slot.rebuilding.store(false, Ordering::Release);
    }
}

/// Consumption ledger across all cap targets
///
/// Writes to the same target are serialized; different targets proceed in
/// parallel. Every applied write updates the cached aggregate under the
/// same lock. A target's cache starts with its first write into an empty
/// book, provided the sale history holds no other eligible sale for it.
/// Otherwise, and for restored targets, reads are served by scanning until
/// the target is reconciled.
pub struct ConsumptionLedger {
    registry: Arc<OffsetRegistry>,
    settlement: Currency,
    slots: RwLock<HashMap<CapTarget, Arc<TargetSlot>>>,
    aggregates: Arc<AggregateStore>,
    history: Option<Arc<dyn SaleHistory>>,
}

impl ConsumptionLedger {
    pub fn new(registry: Arc<OffsetRegistry>, settlement: Currency, aggregates: Arc<AggregateStore>) -> Self {
        Self {
            registry,
            settlement,
            slots: RwLock::new(HashMap::new()),
            aggregates,
            history: None,
        }
    }

    /// Check the sale history before trusting a fresh cache entry
    pub fn with_history(mut self, history: Arc<dyn SaleHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn registry(&self) -> &Arc<OffsetRegistry> {
        &self.registry
    }

    pub fn settlement(&self) -> &Currency {
        &self.settlement
    }

    pub fn aggregates(&self) -> &Arc<AggregateStore> {
        &self.aggregates
    }

    /// Allocate a sale against every target it is eligible for
    #[instrument(skip(self, sale), fields(sale = %sale.id))]
    pub async fn allocate(&self, sale: &Sale) -> Result<Vec<ConsumptionRecord>> {
        let candidates = self.registry.resolve(sale);
        self.allocate_matched(sale, &candidates).await
    }

    /// Allocate a sale against an explicit candidate list
    ///
    /// Targets are written concurrently; each target's write is atomic on
    /// its own. Every write runs to completion even when another target
    /// fails, and the first error is returned.
    pub async fn allocate_matched(&self, sale: &Sale, candidates: &[MatchedOffset]) -> Result<Vec<ConsumptionRecord>> {
        if candidates.is_empty() {
            debug!("No offsets apply to sale {}", sale.id);
            return Ok(Vec::new());
        }
        let writes = candidates.iter().map(|matched| self.allocate_one(sale, matched));
        join_all(writes).await.into_iter().collect()
    }

    async fn allocate_one(&self, sale: &Sale, matched: &MatchedOffset) -> Result<ConsumptionRecord> {
        let entry = LedgerEntry::from_sale(sale, matched, &self.settlement)?;
        let slot = self.slot(&matched.target).await?;
        let upsert = self.write(&slot, &matched.target, entry).await?;
        let record = upsert.record().clone();
        if record.cap_exceeded() {
            info!(
                "{}: sale {} capped to {} of {} unit(s)",
                matched.target, sale.id, record.quantity, record.nominal.quantity
            );
        }
        Ok(record)
    }

    async fn write(&self, slot: &TargetSlot, target: &CapTarget, entry: LedgerEntry) -> Result<Upsert> {
        let mut book = match slot.book.try_lock() {
            Ok(guard) => guard,
            Err(_) if slot.rebuilding.load(Ordering::Acquire) => {
                let conflict = LedgerError::ConcurrentModification(target.to_string());
                warn!("{}; retrying once the rebuild completes", conflict);
                let guard = slot.book.lock().await;
                if slot.rebuilding.load(Ordering::Acquire) {
                    return Err(conflict);
                }
                guard
            }
            Err(_) => slot.book.lock().await,
        };

        if book.is_empty() && self.history_covered(target, &entry.sale_id).await? {
            self.aggregates.seed(book.aggregate()).await;
        }
        let upsert = book.upsert(entry)?;
        if let Upsert::Applied { delta, .. } = &upsert {
            self.aggregates
                .apply(target, delta, book.last_sale_at(), book.exhausted_at())
                .await?;
        }
        Ok(upsert)
    }

    /// True when no sale other than `sale_id` in the history is eligible
    /// for `target`
    async fn history_covered(&self, target: &CapTarget, sale_id: &SaleId) -> Result<bool> {
        let history = match &self.history {
            Some(history) => history,
            None => return Ok(true),
        };
        let info = self
            .registry
            .target_info(target)
            .ok_or_else(|| LedgerError::UnknownTarget(target.to_string()))?;
        let unseen = history
            .sales_since(info.starts, &info.channels)
            .await?
            .iter()
            .filter(|s| &s.id != sale_id && self.registry.resolve_target(target, s).is_some())
            .count();
        if unseen > 0 {
            debug!("{}: {} unallocated sale(s) in history, not caching", target, unseen);
        }
        Ok(unseen == 0)
    }

    pub(crate) async fn slot(&self, target: &CapTarget) -> Result<Arc<TargetSlot>> {
        if let Some(slot) = self.slots.read().await.get(target) {
            return Ok(slot.clone());
        }

        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get(target) {
            return Ok(slot.clone());
        }
        let info = self
            .registry
            .target_info(target)
            .ok_or_else(|| LedgerError::UnknownTarget(target.to_string()))?;
        let book = TargetLedger::new(target.clone(), info.caps);

        let slot = Arc::new(TargetSlot {
            book: Arc::new(Mutex::new(book)),
            rebuilding: AtomicBool::new(false),
        });
        slots.insert(target.clone(), slot.clone());
        Ok(slot)
    }

    /// Take a target out of service for a rebuild
    pub(crate) async fn begin_rebuild(&self, target: &CapTarget) -> Result<RebuildGuard> {
        let slot = self.slot(target).await?;
        slot.rebuilding.store(true, Ordering::Release);
        let book = slot.book.clone().lock_owned().await;
        Ok(RebuildGuard { slot, book })
    }

    /// Copy of a target's book
    ///
    /// Waits for any in-flight write or rebuild on that target.
    pub async fn snapshot(&self, target: &CapTarget) -> Result<TargetLedger> {
        let slot = self.slot(target).await?;
        let book = slot.book.lock().await;
        Ok(book.clone())
    }

    /// Load persisted records
    ///
    /// Cached aggregates of the restored targets are marked stale until a
    /// reconciliation runs.
    pub async fn restore(&self, records: Vec<ConsumptionRecord>) -> Result<usize> {
        let mut by_target: HashMap<CapTarget, Vec<ConsumptionRecord>> = HashMap::new();
        for record in records {
            by_target.entry(record.target.clone()).or_default().push(record);
        }

        let mut restored = 0;
        for (target, records) in by_target {
            let slot = self.slot(&target).await?;
            let mut book = slot.book.lock().await;
            let caps = *book.caps();
            *book = TargetLedger::from_records(target.clone(), caps, records);
            restored += book.len();
            self.aggregates.mark_stale(&target).await;
        }
        info!("Restored {} consumption record(s)", restored);
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::history::InMemorySaleHistory;
    use crate::common::types::{ChannelFlags, FxSnapshot, MonetaryAmount, SaleId, ScopeAttributes};
    use crate::common::types::Channel;
    use crate::ledger::allocation::AllocationOutcome;
    use crate::offsets::{AmountRule, Caps, Effective, OffsetDefinition, OffsetId, ScopePredicate};
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn ars() -> Currency {
        Currency::new("ARS")
    }

    fn registry(unit_cap: u64) -> Arc<OffsetRegistry> {
        let def = OffsetDefinition {
            id: OffsetId::new("promo"),
            scope: ScopePredicate::brand("acme"),
            rule: AmountRule::PerUnit(dec!(100)),
            effective: Effective {
                valid_from: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                valid_to: None,
            },
            channels: ChannelFlags::default(),
            caps: Caps {
                unit_cap: Some(unit_cap),
                monetary_cap_usd: None,
            },
            group_id: None,
        };
        Arc::new(OffsetRegistry::new(vec![def], vec![]).unwrap())
    }

    fn sale(n: u32, quantity: u32) -> Sale {
        let date = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
        Sale {
            id: SaleId::new(format!("S-{:03}", n)),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, n).unwrap(),
            channel: Channel::Marketplace,
            scope: ScopeAttributes {
                brand: "acme".into(),
                category: "home".into(),
                subcategory: "lamps".into(),
                item: "LAMP-1".into(),
            },
            price_list: "classic".into(),
            quantity,
            gross_unit_price: dec!(1000),
            vat_pct: dec!(21),
            unit_cost: MonetaryAmount::settled(dec!(400), ars(), date),
            shipping: None,
            usd_fx: FxSnapshot::new(Currency::usd(), ars(), dec!(1000), date),
        }
    }

    fn ledger(unit_cap: u64) -> ConsumptionLedger {
        ConsumptionLedger::new(registry(unit_cap), ars(), Arc::new(AggregateStore::new()))
    }

    fn promo() -> CapTarget {
        CapTarget::Offset(OffsetId::new("promo"))
    }

    #[tokio::test]
    async fn test_allocation_respects_unit_cap() {
        let ledger = ledger(10);
        ledger.allocate(&sale(1, 8)).await.unwrap();
        let records = ledger.allocate(&sale(2, 5)).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].quantity, 2);
        assert_eq!(records[0].amount, dec!(200));
        assert_eq!(records[0].outcome, AllocationOutcome::Partial);

        let cached = ledger.aggregates().get(&promo()).await.unwrap();
        assert_eq!(cached.units, 10);
        assert!(cached.exhausted);
        assert_eq!(cached.exhausted_at, Some(sale(2, 5).timestamp));
    }

    #[tokio::test]
    async fn test_double_allocation_is_idempotent() {
        let ledger = ledger(10);
        ledger.allocate(&sale(1, 3)).await.unwrap();
        ledger.allocate(&sale(1, 3)).await.unwrap();

        let cached = ledger.aggregates().get(&promo()).await.unwrap();
        assert_eq!(cached.records, 1);
        assert_eq!(cached.units, 3);
    }

    #[tokio::test]
    async fn test_unmatched_sale_allocates_nothing() {
        let ledger = ledger(10);
        let mut other = sale(1, 3);
        other.scope.brand = "globex".into();
        assert!(ledger.allocate(&other).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_never_exceed_cap() {
        let ledger = Arc::new(ledger(10));
        let handles: Vec<_> = (0..25)
            .map(|n| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.allocate(&sale(n, 1)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let book = ledger.snapshot(&promo()).await.unwrap();
        assert_eq!(book.totals().units, 10);
        assert_eq!(book.len(), 25);
        assert_eq!(ledger.aggregates().get(&promo()).await.unwrap().units, 10);
    }

    #[tokio::test]
    async fn test_writer_waits_out_rebuild() {
        let ledger = Arc::new(ledger(10));
        let guard = ledger.begin_rebuild(&promo()).await.unwrap();

        let writer = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.allocate(&sale(1, 2)).await })
        };
        tokio::task::yield_now().await;
        assert!(guard.book().is_empty());
        drop(guard);

        let records = writer.await.unwrap().unwrap();
        assert_eq!(records[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_restore_marks_cache_stale() {
        let source = ledger(10);
        source.allocate(&sale(1, 4)).await.unwrap();
        let records: Vec<_> = source.snapshot(&promo()).await.unwrap().records().cloned().collect();

        let restored = ledger(10);
        assert_eq!(restored.restore(records).await.unwrap(), 1);
        assert!(restored.aggregates().get(&promo()).await.is_none());
        assert_eq!(restored.snapshot(&promo()).await.unwrap().totals().units, 4);
    }

    #[tokio::test]
    async fn test_cache_stays_cold_with_unallocated_history() {
        let history = Arc::new(InMemorySaleHistory::from_sales(vec![sale(1, 4), sale(2, 5)]));
        let ledger = ledger(10).with_history(history);
        ledger.allocate(&sale(2, 5)).await.unwrap();

        assert!(ledger.aggregates().get(&promo()).await.is_none());
        assert_eq!(ledger.snapshot(&promo()).await.unwrap().totals().units, 5);
    }

    #[tokio::test]
    async fn test_cache_seeded_when_history_is_covered() {
        let history = Arc::new(InMemorySaleHistory::from_sales(vec![sale(1, 4)]));
        let ledger = ledger(10).with_history(history);
        ledger.allocate(&sale(1, 4)).await.unwrap();

        let cached = ledger.aggregates().get(&promo()).await.unwrap();
        assert_eq!(cached.units, 4);
    }

    #[tokio::test]
    async fn test_failing_target_does_not_abandon_other_writes() {
        let ledger = ledger(10);
        let matched = ledger.registry().resolve(&sale(1, 3)).remove(0);
        let missing = MatchedOffset {
            target: CapTarget::Offset(OffsetId::new("missing")),
            ..matched.clone()
        };

        let err = ledger
            .allocate_matched(&sale(1, 3), &[missing, matched])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownTarget(_)));

        let book = ledger.snapshot(&promo()).await.unwrap();
        assert_eq!(book.len(), 1);
        assert_eq!(ledger.aggregates().get(&promo()).await, Some(book.aggregate()));
    }

    #[tokio::test]
    async fn test_unknown_target_rejected() {
        let ledger = ledger(10);
        let err = ledger
            .snapshot(&CapTarget::Offset(OffsetId::new("missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownTarget(_)));
    }
}
