use chrono::DateTime;
use reqwest::Client;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::debug;

use crate::types::{ExplainError, OhlcRow, PriceFeed, Result};

/// CoinGecko API client for daily OHLC history.
///
/// Free tier is rate limited (~10-30 calls/minute); the daily batch path
/// makes a single candles request per run, so no client-side throttling is
/// needed here.
pub struct CoinGeckoClient {
    client: Client,
    base_url: String,
    coin_id: String,
    api_key: Option<String>,
}

impl CoinGeckoClient {
    pub fn new(coin_id: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_base_url("https://api.coingecko.com/api/v3", coin_id, api_key)
    }

    /// Used by tests to point the client at a mock server.
    pub fn with_base_url(
        base_url: impl Into<String>,
        coin_id: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            coin_id: coin_id.into(),
            api_key,
        }
    }

    /// Fetch daily OHLC candles.
    ///
    /// Endpoint: `/coins/{id}/ohlc?vs_currency=usd&days=N`
    /// Response rows: `[[timestamp_ms, open, high, low, close], ...]`
    pub async fn fetch_ohlc(&self, days: u32) -> Result<Vec<OhlcRow>> {
        let url = format!(
            "{}/coins/{}/ohlc?vs_currency=usd&days={}",
            self.base_url, self.coin_id, days
        );

        debug!("Fetching {} days of OHLC for {}", days, self.coin_id);

        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.header("x-cg-pro-api-key", key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ExplainError::upstream("coingecko", e.to_string()))?;

        let status = response.status();
        if status == 429 {
            return Err(ExplainError::upstream("coingecko", "rate limited (429)"));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExplainError::upstream(
                "coingecko",
                format!("HTTP {status}: {text}"),
            ));
        }

        let rows: Vec<[f64; 5]> = response
            .json()
            .await
            .map_err(|e| ExplainError::upstream("coingecko", e.to_string()))?;

        let candles: Vec<OhlcRow> = rows
            .into_iter()
            .filter_map(|ohlc| {
                let timestamp = DateTime::from_timestamp_millis(ohlc[0] as i64)?;
                Some(OhlcRow {
                    timestamp,
                    open: Decimal::try_from(ohlc[1]).ok()?,
                    high: Decimal::try_from(ohlc[2]).ok()?,
                    low: Decimal::try_from(ohlc[3]).ok()?,
                    close: Decimal::try_from(ohlc[4]).ok()?,
                })
            })
            .collect();

        Ok(candles)
    }
}

#[async_trait::async_trait]
impl PriceFeed for CoinGeckoClient {
    async fn fetch_daily_candles(&self, days: u32) -> Result<Vec<OhlcRow>> {
        self.fetch_ohlc(days).await
    }
}
