use chrono::NaiveDate;
use reqwest::Client;
use std::time::Duration;

use crate::types::{DailyWeather, ExplainError, Result, WeatherFeed};

/// Open-Meteo client used for the demonstrative extreme-weather signal.
pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new() -> Self {
        Self::with_base_url("https://api.open-meteo.com")
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

    /// Fetch daily max temperature, precipitation and max wind for one
    /// coordinate on one date.
    pub async fn fetch_daily_weather(
        &self,
        date: NaiveDate,
        lat: f64,
        lon: f64,
    ) -> Result<Option<DailyWeather>> {
        let url = format!(
            "{}/v1/forecast?latitude={}&longitude={}&start_date={}&end_date={}&daily=temperature_2m_max,precipitation_sum,wind_speed_10m_max&timezone=UTC",
            self.base_url, lat, lon, date, date
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExplainError::upstream("open-meteo", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExplainError::upstream(
                "open-meteo",
                format!("HTTP {status}: {text}"),
            ));
        }

        let root: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ExplainError::upstream("open-meteo", e.to_string()))?;

        let Some(daily) = root.get("daily") else {
            return Ok(None);
        };

        let first = |key: &str| -> Option<f64> {
            daily.get(key).and_then(|a| a.get(0)).and_then(|v| v.as_f64())
        };

        let (Some(tmax_c), Some(precip_mm), Some(wind_max_kmh)) = (
            first("temperature_2m_max"),
            first("precipitation_sum"),
            first("wind_speed_10m_max"),
        ) else {
            return Ok(None);
        };

        Ok(Some(DailyWeather {
            tmax_c,
            precip_mm,
            wind_max_kmh,
        }))
    }
}

impl Default for OpenMeteoClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl WeatherFeed for OpenMeteoClient {
    async fn fetch_daily(
        &self,
        date: NaiveDate,
        lat: f64,
        lon: f64,
    ) -> Result<Option<DailyWeather>> {
        self.fetch_daily_weather(date, lat, lon).await
    }
}
