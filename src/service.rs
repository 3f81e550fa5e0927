//! Service façade over pricing, offsets, ledger and reconciliation

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::SaleHistory;
use crate::common::types::{Currency, MonetaryAmount, Sale};
use crate::config::AppConfig;
use crate::fx::{FxNormalizer, HttpRateSource};
use crate::ledger::{ConsumptionLedger, ConsumptionRecord};
use crate::offsets::{CapTarget, Caps, GroupId, OffsetId, OffsetRegistry};
use crate::pricing::{self, PricingContext, ProceedsCalculator, SaleEvaluation, ScheduleBook};
use crate::reconcile::{ReconciliationJob, ReconciliationReport};
use crate::resume::{AggregateStore, CachedResume, ResumeAggregate, ResumeReader, ScanResume};

/// Consumption against a cap target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStatus {
    pub target: CapTarget,
    pub consumed_units: u64,
    pub consumed_amount: Decimal,
    pub consumed_usd: Decimal,
    pub caps: Caps,
    pub remaining_units: Option<u64>,
    pub remaining_usd: Option<Decimal>,
    pub exhausted: bool,
    pub exhausted_at: Option<DateTime<Utc>>,
}

impl GroupStatus {
    fn from_aggregate(aggregate: ResumeAggregate, caps: Caps) -> Self {
        Self {
            remaining_units: caps.unit_cap.map(|c| c.saturating_sub(aggregate.units)),
            remaining_usd: caps
                .monetary_cap_usd
                .map(|c| (c - aggregate.amount_usd).max(Decimal::ZERO)),
            target: aggregate.target,
            consumed_units: aggregate.units,
            consumed_amount: aggregate.amount,
            consumed_usd: aggregate.amount_usd,
            caps,
            exhausted: aggregate.exhausted,
            exhausted_at: aggregate.exhausted_at,
        }
    }
}

/// Entry point for collaborators
///
/// Pricing calls are pure. Ledger writes are serialized per cap target
/// and may be issued from any number of tasks.
pub struct MarginService {
    schedules: Arc<ScheduleBook>,
    registry: Arc<OffsetRegistry>,
    ledger: Arc<ConsumptionLedger>,
    reader: ResumeReader,
    reconciler: ReconciliationJob,
    fx: Option<Arc<FxNormalizer>>,
    settlement: Currency,
}

impl MarginService {
    pub fn new(
        schedules: ScheduleBook,
        registry: OffsetRegistry,
        settlement: Currency,
        history: Arc<dyn SaleHistory>,
    ) -> Self {
        let registry = Arc::new(registry);
        let aggregates = Arc::new(AggregateStore::new());
        let ledger = Arc::new(
            ConsumptionLedger::new(registry.clone(), settlement.clone(), aggregates.clone())
                .with_history(history.clone()),
        );
        let reader = ResumeReader::new(
            Arc::new(CachedResume::new(aggregates)),
            Arc::new(ScanResume::with_history(ledger.clone(), history.clone())),
        );
        let reconciler = ReconciliationJob::new(ledger.clone(), history);

        Self {
            schedules: Arc::new(schedules),
            registry,
            ledger,
            reader,
            reconciler,
            fx: None,
            settlement,
        }
    }

    /// Build from configuration
    ///
    /// An HTTP rate source is attached when `settings.rate_service_url` is set.
    pub fn from_config(config: &AppConfig, history: Arc<dyn SaleHistory>) -> Result<Self> {
        let schedules = ScheduleBook::new(
            config.commission.schedules.clone(),
            config.commission.floor_rate_pct,
        )?;
        let registry = OffsetRegistry::new(config.offsets.clone(), config.groups.clone())?;
        let settlement = Currency::new(&config.settings.settlement_currency);
        let mut service = Self::new(schedules, registry, settlement.clone(), history);

        if let Some(url) = &config.settings.rate_service_url {
            let source = HttpRateSource::with_timeout(
                url,
                Duration::from_secs(config.settings.request_timeout_seconds),
            )?;
            service = service.with_fx(FxNormalizer::with_ttl(
                Arc::new(source),
                settlement,
                Duration::from_secs(config.settings.fx_cache_ttl_seconds),
            ));
        }
        Ok(service)
    }

    pub fn with_fx(mut self, fx: FxNormalizer) -> Self {
        self.fx = Some(Arc::new(fx));
        self
    }

    pub fn settlement(&self) -> &Currency {
        &self.settlement
    }

    pub fn schedules(&self) -> &ScheduleBook {
        &self.schedules
    }

    pub fn registry(&self) -> &OffsetRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<ConsumptionLedger> {
        &self.ledger
    }

    /// Commission, net proceeds and markup of a sale
    pub fn evaluate_sale(&self, sale: &Sale) -> Result<SaleEvaluation> {
        ProceedsCalculator::evaluate(&self.schedules, sale, &self.settlement)
    }

    /// Lowest gross unit price reaching `target_markup`, rounded up to cents
    pub fn solve_price_for_markup(
        &self,
        cost: &MonetaryAmount,
        target_markup: Decimal,
        ctx: &PricingContext,
    ) -> Result<Decimal> {
        pricing::solve_price_for_markup(&self.schedules, cost, target_markup, ctx, &self.settlement)
    }

    /// Record a cost in any currency with a snapshot from the FX feed
    pub async fn snapshot_cost(&self, value: Decimal, currency: Currency, date: NaiveDate) -> Result<MonetaryAmount> {
        match &self.fx {
            Some(fx) => fx.record(value, currency, date).await,
            None if currency == self.settlement => Ok(MonetaryAmount::settled(value, currency, date)),
            None => Err(LedgerError::Configuration(format!(
                "no FX source configured to convert {} to {}",
                currency, self.settlement
            ))),
        }
    }

    /// Allocate a sale against every offset and group it matches
    #[instrument(skip(self, sale), fields(sale = %sale.id))]
    pub async fn allocate_offsets(&self, sale: &Sale) -> Result<Vec<ConsumptionRecord>> {
        self.ledger.allocate(sale).await
    }

    #[instrument(skip(self))]
    pub async fn get_group_status(&self, group_id: &GroupId) -> Result<GroupStatus> {
        self.status(&CapTarget::Group(group_id.clone())).await
    }

    /// Status of an ungrouped offset; grouped offsets report through their group
    #[instrument(skip(self))]
    pub async fn get_offset_status(&self, offset_id: &OffsetId) -> Result<GroupStatus> {
        self.status(&CapTarget::Offset(offset_id.clone())).await
    }

    /// Status of every cap target, in candidate order
    pub async fn statuses(&self) -> Result<Vec<GroupStatus>> {
        let mut statuses = Vec::new();
        for target in self.registry.targets() {
            statuses.push(self.status(&target).await?);
        }
        Ok(statuses)
    }

    async fn status(&self, target: &CapTarget) -> Result<GroupStatus> {
        let info = self
            .registry
            .target_info(target)
            .ok_or_else(|| LedgerError::UnknownTarget(target.to_string()))?;
        let aggregate = self.reader.resume(target).await?;
        Ok(GroupStatus::from_aggregate(aggregate, info.caps))
    }

    pub async fn reconcile(&self, target: &CapTarget) -> Result<ReconciliationReport> {
        self.reconciler.rebuild(target).await
    }

    pub async fn reconcile_all(&self) -> Result<Vec<ReconciliationReport>> {
        let reports = self.reconciler.rebuild_all().await?;
        let changed = reports.iter().filter(|r| r.changed()).count();
        info!("Reconciled {} target(s), {} changed", reports.len(), changed);
        Ok(reports)
    }
}
