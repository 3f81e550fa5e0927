use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::FxRateSource;
use crate::common::types::{Currency, FxSnapshot, MonetaryAmount};

/// Default lifetime of a cached rate
pub const DEFAULT_RATE_TTL: Duration = Duration::from_secs(15 * 60);

type RateKey = (Currency, Currency, NaiveDate);

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    rate: Decimal,
    fetched_at: Instant,
}

/// Converts amounts to settlement currency at point-in-time rates
///
/// Owns an explicit rate cache keyed by (base, quote, date). Entries expire
/// after `ttl`; the cache is per-instance, so tests and separate engines
/// never share state.
pub struct FxNormalizer {
    source: Arc<dyn FxRateSource>,
    settlement: Currency,
    ttl: Duration,
    cache: RwLock<HashMap<RateKey, CachedRate>>,
}

impl FxNormalizer {
    pub fn new(source: Arc<dyn FxRateSource>, settlement: Currency) -> Self {
        Self::with_ttl(source, settlement, DEFAULT_RATE_TTL)
    }

    pub fn with_ttl(source: Arc<dyn FxRateSource>, settlement: Currency, ttl: Duration) -> Self {
        Self {
            source,
            settlement,
            ttl,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn settlement(&self) -> &Currency {
        &self.settlement
    }

    /// Snapshot for `1 base = rate quote` on `date`
    #[instrument(skip(self), fields(source = self.source.source_name()))]
    pub async fn snapshot(&self, base: &Currency, quote: &Currency, date: NaiveDate) -> Result<FxSnapshot> {
        if base == quote {
            return Ok(FxSnapshot::identity(base.clone(), date));
        }

        let key = (base.clone(), quote.clone(), date);
        if let Some(cached) = self.cache.read().await.get(&key) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(FxSnapshot::new(base.clone(), quote.clone(), cached.rate, date));
            }
        }

        let rate = self.source.fetch_rate(base, quote, date).await?;
        if rate <= Decimal::ZERO {
            return Err(LedgerError::FxRateUnavailable {
                base: base.to_string(),
                quote: quote.to_string(),
                date,
            });
        }
        debug!("Fetched {}/{} on {}: {}", base, quote, date, rate);

        self.cache.write().await.insert(
            key,
            CachedRate {
                rate,
                fetched_at: Instant::now(),
            },
        );

        Ok(FxSnapshot::new(base.clone(), quote.clone(), rate, date))
    }

    /// The USD snapshot a sale on `date` is recorded under
    pub async fn usd_snapshot(&self, date: NaiveDate) -> Result<FxSnapshot> {
        let settlement = self.settlement.clone();
        self.snapshot(&Currency::usd(), &settlement, date).await
    }

    /// Record an amount together with its snapshot into settlement currency
    pub async fn record(&self, value: Decimal, currency: Currency, date: NaiveDate) -> Result<MonetaryAmount> {
        let settlement = self.settlement.clone();
        let fx = self.snapshot(&currency, &settlement, date).await?;
        Ok(MonetaryAmount::new(value, currency, fx))
    }

    /// Convert straight to settlement currency
    pub async fn to_settlement(&self, value: Decimal, currency: &Currency, date: NaiveDate) -> Result<Decimal> {
        self.record(value, currency.clone(), date)
            .await?
            .in_currency(&self.settlement)
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.read().await.len()
    }
}

/// Fixed table of rates, for tests and offline replays
///
/// Looks up the latest rate on or before the requested date.
#[derive(Debug, Clone, Default)]
pub struct StaticRateSource {
    rates: HashMap<(Currency, Currency), BTreeMap<NaiveDate, Decimal>>,
}

impl StaticRateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, base: Currency, quote: Currency, from: NaiveDate, rate: Decimal) -> Self {
        self.insert(base, quote, from, rate);
        self
    }

    pub fn insert(&mut self, base: Currency, quote: Currency, from: NaiveDate, rate: Decimal) {
        self.rates.entry((base, quote)).or_default().insert(from, rate);
    }
}

#[async_trait]
impl FxRateSource for StaticRateSource {
    async fn fetch_rate(&self, base: &Currency, quote: &Currency, date: NaiveDate) -> Result<Decimal> {
        self.rates
            .get(&(base.clone(), quote.clone()))
            .and_then(|series| series.range(..=date).next_back())
            .map(|(_, rate)| *rate)
            .ok_or_else(|| LedgerError::FxRateUnavailable {
                base: base.to_string(),
                quote: quote.to_string(),
                date,
            })
    }

    fn source_name(&self) -> &'static str {
        "static"
    }
}
