use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::SaleHistory;
use crate::ledger::{ConsumptionLedger, LedgerEntry, TargetLedger};
use crate::offsets::CapTarget;
use crate::resume::ResumeAggregate;

/// Outcome of rebuilding one cap target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub target: CapTarget,
    pub sales_scanned: usize,
    pub records: usize,
    pub previous_digest: String,
    pub digest: String,
    pub aggregate: ResumeAggregate,
}

impl ReconciliationReport {
    pub fn changed(&self) -> bool {
        self.previous_digest != self.digest
    }
}

/// Rebuilds targets from the authoritative sale history
///
/// The rebuilt book and aggregate replace the live ones in one step while
/// the target is locked. Any failure leaves the previous state in place.
pub struct ReconciliationJob {
    ledger: Arc<ConsumptionLedger>,
    history: Arc<dyn SaleHistory>,
}

impl ReconciliationJob {
    pub fn new(ledger: Arc<ConsumptionLedger>, history: Arc<dyn SaleHistory>) -> Self {
        Self { ledger, history }
    }

    #[instrument(skip(self), fields(target = %target))]
    pub async fn rebuild(&self, target: &CapTarget) -> Result<ReconciliationReport> {
        let started = Instant::now();
        let registry = self.ledger.registry().clone();
        let info = registry
            .target_info(target)
            .ok_or_else(|| LedgerError::UnknownTarget(target.to_string()))?;

        let mut guard = self.ledger.begin_rebuild(target).await?;
        let previous_digest = guard.book().aggregate().digest()?;

        let mut sales = self.history.sales_since(info.starts, &info.channels).await?;
        sales.sort_by_key(|s| s.order_key());

        let mut scratch = TargetLedger::new(target.clone(), info.caps);
        for sale in &sales {
            if let Some(matched) = registry.resolve_target(target, sale) {
                let entry = LedgerEntry::from_sale(sale, &matched, self.ledger.settlement())?;
                scratch.upsert(entry)?;
            }
        }

        let aggregate = scratch.aggregate();
        let digest = aggregate.digest()?;
        let records = scratch.len();
        guard.replace(scratch);
        self.ledger.aggregates().replace(aggregate.clone()).await;
        drop(guard);

        let report = ReconciliationReport {
            target: target.clone(),
            sales_scanned: sales.len(),
            records,
            previous_digest,
            digest,
            aggregate,
        };
        info!(
            "Rebuilt {} from {} sale(s) in {:?}: {} record(s), changed={}",
            target,
            report.sales_scanned,
            started.elapsed(),
            report.records,
            report.changed()
        );
        Ok(report)
    }

    /// Rebuild every registered target in turn
    ///
    /// Stops at the first failure; targets already rebuilt keep their new state.
    pub async fn rebuild_all(&self) -> Result<Vec<ReconciliationReport>> {
        let targets = self.ledger.registry().targets();
        let mut reports = Vec::with_capacity(targets.len());
        for target in &targets {
            match self.rebuild(target).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!("Reconciliation of {} failed: {}", target, e);
                    return Err(e);
                }
            }
        }
        Ok(reports)
    }
}
