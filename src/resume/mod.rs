//! Resume aggregates: how much of each cap target has been consumed
//!
//! Two interchangeable read paths produce the same totals for the same
//! history:
//!
//! - `CachedResume` reads the aggregate kept current by ledger writes
//! - `ScanResume` sums the ledger records, optionally simulating sales
//!   the ledger has not processed yet
//!
//! `ResumeReader` serves from cache when a complete aggregate exists.

use async_trait::async_trait;

use crate::common::errors::Result;
use crate::offsets::CapTarget;

mod aggregate;
mod reader;
mod scan;
mod store;

pub use aggregate::ResumeAggregate;
pub use reader::ResumeReader;
pub use scan::ScanResume;
pub use store::{AggregateStore, CachedResume};

/// A strategy for producing a target's aggregate
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResumeSource: Send + Sync {
    /// `None` when this strategy cannot answer for the target
    async fn resume(&self, target: &CapTarget) -> Result<Option<ResumeAggregate>>;

    fn strategy_name(&self) -> &'static str;
}
