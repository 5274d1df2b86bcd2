//! Daily refresh batch path.
//!
//! Ingestion steps are isolated best-effort: one provider outage never stops
//! detection, the other signals, or explanation regeneration.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::EventCache;
use crate::config::AppConfig;
use crate::detect::EventDetector;
use crate::explain::Explainer;
use crate::ingest::{FxIngest, NewsIngest, PriceIngest, SentimentIngest, WeatherIngest};
use crate::store::Stores;

pub struct DailyRefreshJob {
    price_ingest: Arc<PriceIngest>,
    detector: Arc<EventDetector>,
    news_ingest: Arc<NewsIngest>,
    sentiment_ingest: Arc<SentimentIngest>,
    fx_ingest: Arc<FxIngest>,
    weather_ingest: Arc<WeatherIngest>,
    explainer: Arc<Explainer>,
    stores: Stores,
    cache: Arc<EventCache>,
    config: Arc<AppConfig>,
}

impl DailyRefreshJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        price_ingest: Arc<PriceIngest>,
        detector: Arc<EventDetector>,
        news_ingest: Arc<NewsIngest>,
        sentiment_ingest: Arc<SentimentIngest>,
        fx_ingest: Arc<FxIngest>,
        weather_ingest: Arc<WeatherIngest>,
        explainer: Arc<Explainer>,
        stores: Stores,
        cache: Arc<EventCache>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            price_ingest,
            detector,
            news_ingest,
            sentiment_ingest,
            fx_ingest,
            weather_ingest,
            explainer,
            stores,
            cache,
            config,
        }
    }

    /// Runs at startup, on the daily interval, and on demand via the admin
    /// endpoint.
    pub async fn run(&self) {
        if !self.config.jobs_enabled {
            return;
        }
        info!("Daily refresh started");

        let upserts = match self.price_ingest.ingest_daily_ohlc().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Price ingest failed: {e}");
                0
            }
        };

        let created = match self.detector.detect().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Event detection failed: {e}");
                0
            }
        };

        // Signal stats are ingested for yesterday to keep things stable:
        // today's day is still accumulating.
        let yesterday = Utc::now().date_naive() - Duration::days(1);
        if let Err(e) = self.news_ingest.ingest_for_date(yesterday).await {
            warn!("News ingest failed for {yesterday}: {e}");
        }
        if let Err(e) = self.sentiment_ingest.ingest_latest().await {
            warn!("Sentiment ingest failed: {e}");
        }
        if let Err(e) = self.fx_ingest.ingest_eur_usd(yesterday).await {
            warn!("FX ingest failed for {yesterday}: {e}");
        }
        if let Err(e) = self.weather_ingest.ingest_extremes(yesterday).await {
            warn!("Weather ingest failed for {yesterday}: {e}");
        }

        // Regenerate explanations for the newest events, best-effort per event.
        match self
            .stores
            .events
            .find_latest(&self.config.asset_symbol, self.config.keep_last)
            .await
        {
            Ok(latest) => {
                for event in latest {
                    if let Err(e) = self.explainer.explain(event.id).await {
                        warn!("Explanation refresh failed for event {}: {e}", event.id);
                    }
                }
            }
            Err(e) => warn!("Could not list latest events: {e}"),
        }

        self.cache.invalidate_all().await;
        info!("Daily refresh done. price_upserts={upserts}, events_created={created}");
    }

    /// Spawn the periodic scheduler. The first run happens immediately.
    pub fn spawn(job: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval_secs = job.config.refresh_interval_secs.max(60);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                job.run().await;
            }
        })
    }
}
