//! HTTP client for a point-in-time FX rate service

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use crate::common::errors::{LedgerError, Result};
use crate::common::traits::FxRateSource;
use crate::common::types::Currency;

/// Response body of `GET /rates?base=..&quote=..&date=..`
#[derive(Debug, Clone, Deserialize)]
pub struct RateResponse {
    pub base: String,
    pub quote: String,
    pub date: NaiveDate,
    pub rate: Decimal,
}

/// REST client for the FX feed
#[derive(Debug, Clone)]
pub struct HttpRateSource {
    client: Client,
    base_url: Url,
}

impl HttpRateSource {
    /// Create a new client with the default timeout
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create a new client with a custom timeout
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Internal(e.to_string()))?;

        // Trailing slash so `join` keeps any path prefix
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;

        Ok(Self { client, base_url })
    }

    fn rates_url(&self, base: &Currency, quote: &Currency, date: NaiveDate) -> Result<Url> {
        let mut url = self.base_url.join("rates")?;
        url.query_pairs_mut()
            .append_pair("base", base.code())
            .append_pair("quote", quote.code())
            .append_pair("date", &date.format("%Y-%m-%d").to_string());
        Ok(url)
    }
}

#[async_trait]
impl FxRateSource for HttpRateSource {
    #[instrument(skip(self))]
    async fn fetch_rate(&self, base: &Currency, quote: &Currency, date: NaiveDate) -> Result<Decimal> {
        let url = self.rates_url(base, quote, date)?;
        debug!("Fetching FX rate from: {}", url);

        let response = self.client.get(url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LedgerError::FxRateUnavailable {
                base: base.to_string(),
                quote: quote.to_string(),
                date,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::InvalidResponse(format!(
                "Rate service returned status {}: {}",
                status, body
            )));
        }

        let rate: RateResponse = response.json().await?;
        if Currency::new(&rate.base) != *base || Currency::new(&rate.quote) != *quote {
            return Err(LedgerError::InvalidResponse(format!(
                "Asked for {}/{}, got {}/{}",
                base, quote, rate.base, rate.quote
            )));
        }

        Ok(rate.rate)
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}
