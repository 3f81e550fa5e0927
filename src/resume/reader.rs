use std::sync::Arc;
use tracing::debug;

use super::aggregate::ResumeAggregate;
use super::ResumeSource;
use crate::common::errors::{LedgerError, Result};
use crate::offsets::CapTarget;

/// Picks the cached path when it can answer, the scan path otherwise
pub struct ResumeReader {
    cached: Arc<dyn ResumeSource>,
    scan: Arc<dyn ResumeSource>,
}

impl ResumeReader {
    pub fn new(cached: Arc<dyn ResumeSource>, scan: Arc<dyn ResumeSource>) -> Self {
        Self { cached, scan }
    }

    pub async fn resume(&self, target: &CapTarget) -> Result<ResumeAggregate> {
        if let Some(aggregate) = self.cached.resume(target).await? {
            debug!("{}: served by {}", target, self.cached.strategy_name());
            return Ok(aggregate);
        }
        debug!("{}: cache miss, using {}", target, self.scan.strategy_name());
        self.scan
            .resume(target)
            .await?
            .ok_or_else(|| LedgerError::UnknownTarget(target.to_string()))
    }
}
