use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::aggregate::ResumeAggregate;
use super::ResumeSource;
use crate::common::errors::Result;
use crate::ledger::LedgerDelta;
use crate::offsets::CapTarget;

#[derive(Debug, Clone)]
struct CachedAggregate {
    aggregate: ResumeAggregate,
    /// Covers the target's whole history
    complete: bool,
}

/// Cached aggregates, updated incrementally by ledger writes
#[derive(Debug, Default)]
pub struct AggregateStore {
    entries: RwLock<HashMap<CapTarget, CachedAggregate>>,
}

impl AggregateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Complete aggregate for a target, if cached
    pub async fn get(&self, target: &CapTarget) -> Option<ResumeAggregate> {
        self.entries
            .read()
            .await
            .get(target)
            .filter(|e| e.complete)
            .map(|e| e.aggregate.clone())
    }

    /// Insert an aggregate unless the target already has one
    pub async fn seed(&self, aggregate: ResumeAggregate) {
        self.entries
            .write()
            .await
            .entry(aggregate.target.clone())
            .or_insert(CachedAggregate {
                aggregate,
                complete: true,
            });
    }

    /// Overwrite a target's aggregate and mark it complete
    pub async fn replace(&self, aggregate: ResumeAggregate) {
        self.entries.write().await.insert(
            aggregate.target.clone(),
            CachedAggregate {
                aggregate,
                complete: true,
            },
        );
    }

    /// Apply a write's delta; stale or missing entries are left alone
    pub async fn apply(
        &self,
        target: &CapTarget,
        delta: &LedgerDelta,
        last_sale_at: Option<DateTime<Utc>>,
        exhausted_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(target) {
            Some(entry) if entry.complete => {
                entry.aggregate.apply_delta(delta, last_sale_at, exhausted_at)?;
                Ok(true)
            }
            _ => {
                debug!("{}: no complete cached aggregate, delta skipped", target);
                Ok(false)
            }
        }
    }

    /// Stop serving a target from cache until it is replaced
    pub async fn mark_stale(&self, target: &CapTarget) {
        if let Some(entry) = self.entries.write().await.get_mut(target) {
            entry.complete = false;
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Serves aggregates straight from the cache
pub struct CachedResume {
    store: Arc<AggregateStore>,
}

impl CachedResume {
    pub fn new(store: Arc<AggregateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResumeSource for CachedResume {
    async fn resume(&self, target: &CapTarget) -> Result<Option<ResumeAggregate>> {
        Ok(self.store.get(target).await)
    }

    fn strategy_name(&self) -> &'static str {
        "cached"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offsets::GroupId;
    use rust_decimal_macros::dec;

    fn target() -> CapTarget {
        CapTarget::Group(GroupId::new("spring"))
    }

    #[tokio::test]
    async fn test_delta_applies_to_complete_entry() {
        let store = AggregateStore::new();
        store.seed(ResumeAggregate::empty(target())).await;
        let delta = LedgerDelta {
            records: 1,
            units: 3,
            amount: dec!(300),
            amount_usd: dec!(0.3),
        };

        assert!(store.apply(&target(), &delta, None, None).await.unwrap());
        let cached = store.get(&target()).await.unwrap();
        assert_eq!(cached.units, 3);
        assert_eq!(cached.amount, dec!(300));
    }

    #[tokio::test]
    async fn test_stale_entry_is_hidden_until_replaced() {
        let store = AggregateStore::new();
        store.seed(ResumeAggregate::empty(target())).await;
        store.mark_stale(&target()).await;

        assert!(store.get(&target()).await.is_none());
        assert!(!store
            .apply(&target(), &LedgerDelta::default(), None, None)
            .await
            .unwrap());

        store.replace(ResumeAggregate::empty(target())).await;
        assert!(CachedResume::new(Arc::new(AggregateStore::new()))
            .resume(&target())
            .await
            .unwrap()
            .is_none());
        assert!(store.get(&target()).await.is_some());
    }
}
