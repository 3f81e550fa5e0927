use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::aggregate::ResumeAggregate;
use super::ResumeSource;
use crate::common::errors::{LedgerError, Result};
use crate::common::traits::SaleHistory;
use crate::common::types::Sale;
use crate::ledger::{ConsumptionLedger, LedgerEntry};
use crate::offsets::CapTarget;

/// Recomputes an aggregate by walking the target's records
///
/// With a sale history attached, sales the ledger has not seen yet are
/// simulated on a private copy of the book. Nothing is persisted.
pub struct ScanResume {
    ledger: Arc<ConsumptionLedger>,
    history: Option<Arc<dyn SaleHistory>>,
}

impl ScanResume {
    pub fn new(ledger: Arc<ConsumptionLedger>) -> Self {
        Self { ledger, history: None }
    }

    pub fn with_history(ledger: Arc<ConsumptionLedger>, history: Arc<dyn SaleHistory>) -> Self {
        Self {
            ledger,
            history: Some(history),
        }
    }
}

#[async_trait]
impl ResumeSource for ScanResume {
    #[instrument(skip(self), fields(target = %target))]
    async fn resume(&self, target: &CapTarget) -> Result<Option<ResumeAggregate>> {
        let registry = self.ledger.registry();
        let info = registry
            .target_info(target)
            .ok_or_else(|| LedgerError::UnknownTarget(target.to_string()))?;
        let mut book = self.ledger.snapshot(target).await?;

        if let Some(history) = &self.history {
            let mut pending: Vec<Sale> = history
                .sales_since(info.starts, &info.channels)
                .await?
                .into_iter()
                .filter(|s| !book.contains(&s.id))
                .collect();
            pending.sort_by_key(|s| s.order_key());

            let mut simulated = 0;
            for sale in &pending {
                if let Some(matched) = registry.resolve_target(target, sale) {
                    book.upsert(LedgerEntry::from_sale(sale, &matched, self.ledger.settlement())?)?;
                    simulated += 1;
                }
            }
            debug!("Simulated {} pending sale(s)", simulated);
        }

        Ok(Some(ResumeAggregate::from_records(
            target.clone(),
            &info.caps,
            book.records(),
        )))
    }

    fn strategy_name(&self) -> &'static str {
        "scan"
    }
}
