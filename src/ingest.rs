//! On-demand and scheduled signal ingestion.
//!
//! Each signal ingests independently and best-effort: one provider outage
//! must not prevent the other signals, detection, or narrative generation
//! from proceeding. Callers that only need a snapshot to *exist* get an
//! explicit [`IngestOutcome`] instead of hidden catch-all control flow.

use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::store::{CandleStore, FxStore, NewsStore, SentimentStore, WeatherStore};
use crate::types::{
    DailyCandle, FxFeed, FxSnapshot, NewsFeed, NewsHeadline, NewsStat, PriceFeed, Result,
    SentimentFeed, WeatherExtreme, WeatherFeed,
};

/// What an ensure/ingest attempt actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Fresh data was fetched and stored.
    Ingested,
    /// Data was already present; nothing fetched.
    Skipped,
    /// The attempt failed; the caller proceeds with degraded signals.
    Failed(String),
}

/// Primary news query tries to capture the tracked-asset content while
/// keeping the query simple. Some days return empty for a given query, so
/// fallbacks are tried in order until one yields headlines.
pub const PRIMARY_NEWS_QUERY: &str = "(bitcoin OR btc OR cryptocurrency OR crypto)";

pub const FALLBACK_NEWS_QUERIES: &[&str] = &[
    "(bitcoin OR btc)",
    "(cryptocurrency OR crypto)",
    "bitcoin",
    "btc",
];

const HEADLINE_SAMPLE_SIZE: u32 = 20;

pub struct PriceIngest {
    feed: Arc<dyn PriceFeed>,
    candles: Arc<dyn CandleStore>,
    config: Arc<AppConfig>,
}

impl PriceIngest {
    pub fn new(
        feed: Arc<dyn PriceFeed>,
        candles: Arc<dyn CandleStore>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            feed,
            candles,
            config,
        }
    }

    /// Fetch daily OHLC and upsert candles. New dates are always inserted;
    /// existing candles are overwritten only inside the mutable window.
    /// Returns inserted + updated.
    pub async fn ingest_daily_ohlc(&self) -> Result<u32> {
        self.ingest_daily_ohlc_as_of(Utc::now().date_naive()).await
    }

    pub async fn ingest_daily_ohlc_as_of(&self, today: NaiveDate) -> Result<u32> {
        let asset = self.config.asset_symbol.as_str();
        let rows = self.feed.fetch_daily_candles(self.config.ingest_days).await?;

        let start = today - Duration::days(self.config.ingest_days as i64);
        let existing: std::collections::HashSet<NaiveDate> = self
            .candles
            .find_from(asset, start)
            .await?
            .into_iter()
            .map(|c| c.candle_date)
            .collect();

        let mutable_from = today - Duration::days(self.config.mutable_days as i64);

        let mut inserted = 0;
        let mut updated = 0;
        for row in rows {
            let date = row.timestamp.date_naive();
            let is_new = !existing.contains(&date);
            if !is_new && date < mutable_from {
                continue;
            }

            self.candles
                .upsert(&DailyCandle {
                    asset: asset.to_string(),
                    candle_date: date,
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    // OHLC endpoint does not provide volume.
                    volume: None,
                })
                .await?;

            if is_new {
                inserted += 1;
            } else {
                updated += 1;
            }
        }

        info!("Price ingest for {asset}: {inserted} inserted, {updated} updated");
        Ok(inserted + updated)
    }
}

pub struct NewsIngest {
    feed: Arc<dyn NewsFeed>,
    news: Arc<dyn NewsStore>,
}

impl NewsIngest {
    pub fn new(feed: Arc<dyn NewsFeed>, news: Arc<dyn NewsStore>) -> Self {
        Self { feed, news }
    }

    /// Ingest the raw article count plus a small headline sample for a UTC day.
    pub async fn ingest_for_date(&self, date: NaiveDate) -> Result<()> {
        let count = self.feed.fetch_count(date, PRIMARY_NEWS_QUERY).await?;

        let mut used_query = PRIMARY_NEWS_QUERY.to_string();
        let mut articles = self
            .feed
            .fetch_headlines(date, PRIMARY_NEWS_QUERY, HEADLINE_SAMPLE_SIZE)
            .await
            .unwrap_or_default();
        if articles.is_empty() {
            for query in FALLBACK_NEWS_QUERIES {
                articles = self
                    .feed
                    .fetch_headlines(date, query, HEADLINE_SAMPLE_SIZE)
                    .await
                    .unwrap_or_default();
                if !articles.is_empty() {
                    used_query = query.to_string();
                    break;
                }
            }
        }

        // If headlines exist but the raw count is zero, store a conservative
        // effective count so a populated sample never reads as total silence.
        let effective_count = count.max(articles.len() as u64).min(i32::MAX as u64) as i32;

        self.news
            .upsert_stat(&NewsStat {
                stat_date: date,
                query_tag: used_query,
                article_count: effective_count,
                coverage_pct: None,
            })
            .await?;

        let items: Vec<NewsHeadline> = articles
            .into_iter()
            .filter(|a| !a.title.trim().is_empty())
            .map(|a| NewsHeadline {
                item_date: date,
                title: a.title,
                source: Some(a.source_country),
                url: Some(a.url),
                published_at: a.published_at,
            })
            .collect();
        self.news.replace_headlines(date, &items).await?;

        debug!(
            "News ingest for {date}: count={effective_count}, sample={}",
            items.len()
        );
        Ok(())
    }
}

pub struct FxIngest {
    feed: Arc<dyn FxFeed>,
    fx: Arc<dyn FxStore>,
}

impl FxIngest {
    pub fn new(feed: Arc<dyn FxFeed>, fx: Arc<dyn FxStore>) -> Self {
        Self { feed, fx }
    }

    /// Ingest EUR/USD for a date. When the provider has no rate for that
    /// exact date (weekends/holidays), backfill from the nearest previous day
    /// within 7 days and record the actual source date.
    pub async fn ingest_eur_usd(&self, date: NaiveDate) -> Result<()> {
        let mut source_date = date;
        let mut rate = self.feed.fetch_rate(date).await?;

        if rate.is_none() {
            for offset in 1..=7 {
                let candidate = date - Duration::days(offset);
                if let Some(found) = self.feed.fetch_rate(candidate).await? {
                    rate = Some(found);
                    source_date = candidate;
                    break;
                }
            }
        }

        let Some(rate) = rate else {
            debug!("No EUR/USD rate available for {date} or the 7 prior days");
            return Ok(());
        };

        self.fx
            .upsert(&FxSnapshot {
                rate_date: date,
                source_date: Some(source_date),
                base: "EUR".to_string(),
                quote: "USD".to_string(),
                rate,
            })
            .await?;

        Ok(())
    }
}

pub struct SentimentIngest {
    feed: Arc<dyn SentimentFeed>,
    sentiment: Arc<dyn SentimentStore>,
}

impl SentimentIngest {
    pub fn new(feed: Arc<dyn SentimentFeed>, sentiment: Arc<dyn SentimentStore>) -> Self {
        Self { feed, sentiment }
    }

    pub async fn ingest_latest(&self) -> Result<()> {
        let Some(point) = self.feed.fetch_latest().await? else {
            return Ok(());
        };
        self.sentiment.upsert(&point).await?;
        Ok(())
    }
}

/// Regions sampled for the demonstrative extreme-weather signal.
const WEATHER_REGIONS: &[(&str, f64, f64)] = &[
    ("us-east", 40.71, -74.01),
    ("eu-west", 50.11, 8.68),
    ("asia-east", 35.68, 139.69),
];

const HEAT_TMAX_C: f64 = 40.0;
const RAIN_PRECIP_MM: f64 = 50.0;
const WIND_MAX_KMH: f64 = 90.0;

pub struct WeatherIngest {
    feed: Arc<dyn WeatherFeed>,
    weather: Arc<dyn WeatherStore>,
}

impl WeatherIngest {
    pub fn new(feed: Arc<dyn WeatherFeed>, weather: Arc<dyn WeatherStore>) -> Self {
        Self { feed, weather }
    }

    /// Classify each sampled region's daily weather against fixed extreme
    /// thresholds and upsert one row per (date, region, type). Regions whose
    /// fetch fails are skipped.
    pub async fn ingest_extremes(&self, date: NaiveDate) -> Result<()> {
        for &(region, lat, lon) in WEATHER_REGIONS {
            let daily = match self.feed.fetch_daily(date, lat, lon).await {
                Ok(Some(d)) => d,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Weather fetch failed for {region} on {date}: {e}");
                    continue;
                }
            };

            let mut extremes: Vec<(&str, f64)> = Vec::new();
            if daily.tmax_c >= HEAT_TMAX_C {
                extremes.push(("HEAT", daily.tmax_c));
            }
            if daily.precip_mm >= RAIN_PRECIP_MM {
                extremes.push(("RAIN", daily.precip_mm));
            }
            if daily.wind_max_kmh >= WIND_MAX_KMH {
                extremes.push(("WIND", daily.wind_max_kmh));
            }

            for (extreme_type, severity) in extremes {
                self.weather
                    .upsert(&WeatherExtreme {
                        wx_date: date,
                        region_key: region.to_string(),
                        extreme_type: extreme_type.to_string(),
                        severity: Some(severity),
                    })
                    .await?;
            }
        }

        Ok(())
    }
}
