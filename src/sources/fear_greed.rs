use chrono::DateTime;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::types::{ExplainError, Result, SentimentFeed, SentimentSnapshot};

/// alternative.me Fear & Greed index client.
pub struct FearGreedClient {
    client: Client,
    base_url: String,
}

impl FearGreedClient {
    pub fn new() -> Self {
        Self::with_base_url("https://api.alternative.me")
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

    /// Fetch the most recent Fear & Greed reading.
    pub async fn fetch_latest_point(&self) -> Result<Option<SentimentSnapshot>> {
        let url = format!("{}/fng/?limit=1&format=json", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExplainError::upstream("alternative", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExplainError::upstream(
                "alternative",
                format!("HTTP {status}: {text}"),
            ));
        }

        let root: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ExplainError::upstream("alternative", e.to_string()))?;

        let Some(point) = root.get("data").and_then(|d| d.get(0)) else {
            return Ok(None);
        };

        // Values arrive as strings ("74", "Greed", "1733097600").
        let value = point
            .get("value")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(0);
        let classification = point
            .get("value_classification")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let ts = point
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);

        let Some(date) = DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()) else {
            return Ok(None);
        };

        debug!("Fear & Greed for {date}: {value} ({classification})");

        Ok(Some(SentimentSnapshot {
            sentiment_date: date,
            value,
            classification,
        }))
    }
}

impl Default for FearGreedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SentimentFeed for FearGreedClient {
    async fn fetch_latest(&self) -> Result<Option<SentimentSnapshot>> {
        self.fetch_latest_point().await
    }
}
