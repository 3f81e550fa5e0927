//! Margin Ledger Library
//!
//! Net profitability of marketplace sales under tiered commission
//! schedules, and a capped ledger for the incentive offsets that
//! subsidize them.

pub mod common;
pub mod config;
pub mod fx;
pub mod ledger;
pub mod offsets;
pub mod pricing;
pub mod reconcile;
pub mod resume;
pub mod service;

// Re-export commonly used types
pub use common::errors::{LedgerError, Result};
pub use common::history::InMemorySaleHistory;
pub use common::traits::{FxRateSource, SaleHistory};
pub use common::types::{
    Channel, ChannelFlags, Currency, FxSnapshot, MonetaryAmount, Sale, SaleId, ScopeAttributes,
    ShipmentShare,
};
pub use config::types::AppConfig;
pub use fx::{FxNormalizer, HttpRateSource, StaticRateSource};
pub use ledger::{AllocationOutcome, ConsumptionLedger, ConsumptionRecord};
pub use offsets::{
    AmountRule, CapTarget, Caps, Effective, GroupId, OffsetDefinition, OffsetGroup, OffsetGroupFilter,
    OffsetId, OffsetRegistry, ScopePredicate,
};
pub use pricing::{CommissionSchedule, PricingContext, SaleEvaluation, ScheduleBook, TierBracket};
pub use reconcile::{ReconciliationJob, ReconciliationReport};
pub use resume::{ResumeAggregate, ResumeReader, ResumeSource};
pub use service::{GroupStatus, MarginService};
