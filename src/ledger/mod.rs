//! Consumption ledger: capped allocation of offsets to sales

mod allocation;
mod book;
mod engine;
mod record;

pub use allocation::{apply_caps, Allocation, AllocationOutcome, BindingCap, Nominal, Totals};
pub use book::{LedgerDelta, TargetLedger, Upsert};
pub use engine::ConsumptionLedger;
pub use record::{ConsumptionRecord, LedgerEntry, LedgerKey};
