//! In-memory sale history

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::errors::Result;
use super::traits::SaleHistory;
use super::types::{Channel, Sale, SaleId};

/// Simple in-memory sale history keyed by sale id
///
/// Re-inserting a sale replaces the previous version, which is how
/// cost corrections and quantity amendments reach the reconciliation job.
#[derive(Debug, Default)]
pub struct InMemorySaleHistory {
    sales: RwLock<BTreeMap<SaleId, Sale>>,
}

impl InMemorySaleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sales(sales: impl IntoIterator<Item = Sale>) -> Self {
        let map = sales.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            sales: RwLock::new(map),
        }
    }

    /// Insert or replace a sale
    pub async fn record(&self, sale: Sale) {
        self.sales.write().await.insert(sale.id.clone(), sale);
    }

    pub async fn len(&self) -> usize {
        self.sales.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sales.read().await.is_empty()
    }
}

#[async_trait]
impl SaleHistory for InMemorySaleHistory {
    async fn sales_since(&self, from: NaiveDate, channels: &[Channel]) -> Result<Vec<Sale>> {
        let sales = self.sales.read().await;
        Ok(sales
            .values()
            .filter(|s| s.date() >= from && channels.contains(&s.channel))
            .cloned()
            .collect())
    }
}
