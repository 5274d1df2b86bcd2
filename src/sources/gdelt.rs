use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::types::{ExplainError, NewsArticle, NewsFeed, Result};

/// Minimal GDELT DOC 2.1 client.
///
/// Mode semantics:
/// - `TimelineVolRaw` returns the raw count of matching articles per bucket.
/// - `TimelineVol` returns a coverage share (percentage of all global news,
///   can be fractional).
/// - `ArtList` returns article records (titles/urls) for a window.
pub struct GdeltClient {
    client: Client,
    base_url: String,
}

impl GdeltClient {
    pub fn new() -> Self {
        Self::with_base_url("https://api.gdeltproject.org/api/v2/doc/doc")
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

    fn day_window(date: NaiveDate) -> (String, String) {
        // GDELT expects UTC datetimes as yyyyMMddHHmmss.
        let start = format!("{}000000", date.format("%Y%m%d"));
        let end = format!("{}235959", date.format("%Y%m%d"));
        (start, end)
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExplainError::upstream("gdelt", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExplainError::upstream(
                "gdelt",
                format!("HTTP {status}: {text}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ExplainError::upstream("gdelt", e.to_string()))
    }

    /// Raw number of matching articles for a single UTC day (sum of all
    /// `TimelineVolRaw` buckets).
    pub async fn fetch_news_count(&self, date: NaiveDate, query: &str) -> Result<u64> {
        let (start, end) = Self::day_window(date);
        let url = format!(
            "{}?query={}&mode=TimelineVolRaw&format=json&startdatetime={}&enddatetime={}",
            self.base_url,
            urlencoding::encode(query),
            start,
            end
        );

        let root = self.get_json(&url).await?;
        let mut sum: u64 = 0;
        if let Some(buckets) = root.get("timeline").and_then(|t| t.as_array()) {
            // In TimelineVolRaw, "value" is the raw count for that bucket.
            for bucket in buckets {
                sum += bucket.get("value").and_then(|v| v.as_u64()).unwrap_or(0);
            }
        }
        debug!("GDELT raw count for {date}: {sum}");
        Ok(sum)
    }

    /// Coverage share of all global news for the day. A qualitative intensity
    /// metric, not an article count.
    pub async fn fetch_news_coverage_pct(&self, date: NaiveDate, query: &str) -> Result<f64> {
        let (start, end) = Self::day_window(date);
        let url = format!(
            "{}?query={}&mode=TimelineVol&format=json&startdatetime={}&enddatetime={}",
            self.base_url,
            urlencoding::encode(query),
            start,
            end
        );

        let root = self.get_json(&url).await?;
        // TimelineVol "value" can be fractional (coverage share).
        let value = root
            .get("timeline")
            .and_then(|t| t.get(0))
            .and_then(|bucket| bucket.get("value"))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        Ok(value)
    }

    /// Top matching articles for the day, hybrid-relevance sorted.
    pub async fn fetch_top_articles(
        &self,
        date: NaiveDate,
        query: &str,
        max_records: u32,
    ) -> Result<Vec<NewsArticle>> {
        let (start, end) = Self::day_window(date);
        let url = format!(
            "{}?query={}&mode=ArtList&format=json&maxrecords={}&startdatetime={}&enddatetime={}&sort=hybridrel",
            self.base_url,
            urlencoding::encode(query),
            max_records,
            start,
            end
        );

        let root = self.get_json(&url).await?;
        let mut out = Vec::new();
        if let Some(articles) = root.get("articles").and_then(|a| a.as_array()) {
            for article in articles {
                let title = article
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let source_country = article
                    .get("sourceCountry")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let url_link = article
                    .get("url")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let published_at = article
                    .get("seendate")
                    .and_then(|v| v.as_str())
                    .and_then(parse_gdelt_instant);

                out.push(NewsArticle {
                    title,
                    source_country,
                    url: url_link,
                    published_at,
                });
            }
        }
        Ok(out)
    }
}

impl Default for GdeltClient {
    fn default() -> Self {
        Self::new()
    }
}

/// GDELT timestamps arrive in several shapes: ISO 8601, "yyyy-MM-dd HH:mm:ss",
/// or compact "yyyyMMddHHmmss".
fn parse_gdelt_instant(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.contains('T') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    if s.contains('-') && s.contains(' ') {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Some(naive.and_utc());
        }
    }

    if s.len() == 14 && s.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S") {
            return Some(naive.and_utc());
        }
    }

    None
}

#[async_trait::async_trait]
impl NewsFeed for GdeltClient {
    async fn fetch_count(&self, date: NaiveDate, query: &str) -> Result<u64> {
        self.fetch_news_count(date, query).await
    }

    async fn fetch_coverage_pct(&self, date: NaiveDate, query: &str) -> Result<f64> {
        self.fetch_news_coverage_pct(date, query).await
    }

    async fn fetch_headlines(
        &self,
        date: NaiveDate,
        query: &str,
        max_records: u32,
    ) -> Result<Vec<NewsArticle>> {
        self.fetch_top_articles(date, query, max_records).await
    }
}
