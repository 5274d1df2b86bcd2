use chrono::NaiveDate;
use reqwest::Client;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::debug;

use crate::types::{ExplainError, FxFeed, Result};

/// Frankfurter FX client (free, no API key).
///
/// Returns `None` for dates the provider has no rate for (weekends and
/// holidays); callers decide whether to walk back to a previous business day.
pub struct FrankfurterClient {
    client: Client,
    base_url: String,
}

impl FrankfurterClient {
    pub fn new() -> Self {
        Self::with_base_url("https://api.frankfurter.app")
    }

    /// Used by tests to point the client at a mock server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.into(),
        }
    }

    /// Fetch the EUR/USD rate for a date.
    pub async fn fetch_eur_usd(&self, date: NaiveDate) -> Result<Option<Decimal>> {
        let url = format!("{}/{}?from=EUR&to=USD", self.base_url, date);

        debug!("Fetching EUR/USD rate for {date}");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExplainError::upstream("frankfurter", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExplainError::upstream(
                "frankfurter",
                format!("HTTP {status}: {text}"),
            ));
        }

        let root: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ExplainError::upstream("frankfurter", e.to_string()))?;

        // Rates arrive as JSON numbers; parse via the serde_json repr to avoid
        // binary-float round-tripping where possible.
        let rate = root
            .get("rates")
            .and_then(|r| r.get("USD"))
            .and_then(|v| match v {
                serde_json::Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
                _ => None,
            });

        Ok(rate)
    }
}

impl Default for FrankfurterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl FxFeed for FrankfurterClient {
    async fn fetch_rate(&self, date: NaiveDate) -> Result<Option<Decimal>> {
        self.fetch_eur_usd(date).await
    }
}
