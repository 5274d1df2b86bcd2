//! In-memory store implementations.
//!
//! Same upsert semantics as the Postgres stores, backed by maps. Used by the
//! test suites and for running the pipeline without a database.

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use crate::store::{
    CandleStore, EventStore, ExplanationStore, FxStore, NewsStore, SentimentStore, WeatherStore,
};
use crate::types::{
    DailyCandle, Explanation, FxSnapshot, MoveEvent, NewMoveEvent, NewsHeadline, NewsStat, Result,
    SentimentSnapshot, WeatherExtreme,
};

#[derive(Default)]
pub struct MemoryCandleStore {
    rows: RwLock<HashMap<(String, NaiveDate), DailyCandle>>,
}

#[async_trait::async_trait]
impl CandleStore for MemoryCandleStore {
    async fn find_from(&self, asset: &str, start: NaiveDate) -> Result<Vec<DailyCandle>> {
        let rows = self.rows.read().await;
        let mut out: Vec<DailyCandle> = rows
            .values()
            .filter(|c| c.asset == asset && c.candle_date >= start)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.candle_date);
        Ok(out)
    }

    async fn upsert(&self, candle: &DailyCandle) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.insert(
            (candle.asset.clone(), candle.candle_date),
            candle.clone(),
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryEventStore {
    rows: RwLock<HashMap<(String, NaiveDate), MoveEvent>>,
    next_id: AtomicI64,
}

#[async_trait::async_trait]
impl EventStore for MemoryEventStore {
    async fn find_from(&self, asset: &str, start: NaiveDate) -> Result<Vec<MoveEvent>> {
        let rows = self.rows.read().await;
        let mut out: Vec<MoveEvent> = rows
            .values()
            .filter(|e| e.asset == asset && e.event_date >= start)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.event_date);
        Ok(out)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<MoveEvent>> {
        let rows = self.rows.read().await;
        Ok(rows.values().find(|e| e.id == id).cloned())
    }

    async fn find_latest(&self, asset: &str, limit: u32) -> Result<Vec<MoveEvent>> {
        let rows = self.rows.read().await;
        let mut out: Vec<MoveEvent> = rows
            .values()
            .filter(|e| e.asset == asset)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.event_date.cmp(&a.event_date));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn upsert(&self, event: &NewMoveEvent) -> Result<MoveEvent> {
        let mut rows = self.rows.write().await;
        let key = (event.asset.clone(), event.event_date);

        // Existing rows keep their id and created_at, like ON CONFLICT DO UPDATE.
        let (id, created_at) = match rows.get(&key) {
            Some(existing) => (existing.id, existing.created_at),
            None => (
                self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                Utc::now(),
            ),
        };

        let saved = MoveEvent {
            id,
            asset: event.asset.clone(),
            event_date: event.event_date,
            direction: event.direction,
            pct_change: event.pct_change,
            threshold_used: event.threshold_used.clone(),
            severity: event.severity,
            created_at,
        };
        rows.insert(key, saved.clone());
        Ok(saved)
    }
}

#[derive(Default)]
pub struct MemoryExplanationStore {
    rows: RwLock<HashMap<i64, Explanation>>,
}

#[async_trait::async_trait]
impl ExplanationStore for MemoryExplanationStore {
    async fn find_by_event_id(&self, event_id: i64) -> Result<Option<Explanation>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&event_id).cloned())
    }

    async fn save(&self, explanation: &Explanation) -> Result<()> {
        // Mirror the Postgres store: the factor set must be encodable.
        serde_json::to_string(&explanation.factors)?;
        let mut rows = self.rows.write().await;
        rows.insert(explanation.event_id, explanation.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryNewsStore {
    stats: RwLock<HashMap<NaiveDate, NewsStat>>,
    headlines: RwLock<Vec<NewsHeadline>>,
}

#[async_trait::async_trait]
impl NewsStore for MemoryNewsStore {
    async fn find_stat(&self, date: NaiveDate) -> Result<Option<NewsStat>> {
        let stats = self.stats.read().await;
        Ok(stats.get(&date).cloned())
    }

    async fn upsert_stat(&self, stat: &NewsStat) -> Result<()> {
        let mut stats = self.stats.write().await;
        stats.insert(stat.stat_date, stat.clone());
        Ok(())
    }

    async fn find_headlines(&self, date: NaiveDate, limit: u32) -> Result<Vec<NewsHeadline>> {
        let headlines = self.headlines.read().await;
        let mut out: Vec<NewsHeadline> = headlines
            .iter()
            .filter(|h| h.item_date == date)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn replace_headlines(&self, date: NaiveDate, items: &[NewsHeadline]) -> Result<()> {
        let mut headlines = self.headlines.write().await;
        headlines.retain(|h| h.item_date != date);
        headlines.extend(items.iter().cloned());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySentimentStore {
    rows: RwLock<HashMap<NaiveDate, SentimentSnapshot>>,
}

#[async_trait::async_trait]
impl SentimentStore for MemorySentimentStore {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Option<SentimentSnapshot>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&date).cloned())
    }

    async fn upsert(&self, snapshot: &SentimentSnapshot) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.insert(snapshot.sentiment_date, snapshot.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryFxStore {
    rows: RwLock<HashMap<(NaiveDate, String, String), FxSnapshot>>,
}

#[async_trait::async_trait]
impl FxStore for MemoryFxStore {
    async fn find_by_date(
        &self,
        date: NaiveDate,
        base: &str,
        quote: &str,
    ) -> Result<Option<FxSnapshot>> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(date, base.to_string(), quote.to_string()))
            .cloned())
    }

    async fn upsert(&self, snapshot: &FxSnapshot) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.insert(
            (
                snapshot.rate_date,
                snapshot.base.clone(),
                snapshot.quote.clone(),
            ),
            snapshot.clone(),
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryWeatherStore {
    rows: RwLock<HashMap<(NaiveDate, String, String), WeatherExtreme>>,
}

#[async_trait::async_trait]
impl WeatherStore for MemoryWeatherStore {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Vec<WeatherExtreme>> {
        let rows = self.rows.read().await;
        let mut out: Vec<WeatherExtreme> = rows
            .values()
            .filter(|w| w.wx_date == date)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (&a.region_key, &a.extreme_type).cmp(&(&b.region_key, &b.extreme_type))
        });
        Ok(out)
    }

    async fn upsert(&self, extreme: &WeatherExtreme) -> Result<()> {
        let mut rows = self.rows.write().await;
        rows.insert(
            (
                extreme.wx_date,
                extreme.region_key.clone(),
                extreme.extreme_type.clone(),
            ),
            extreme.clone(),
        );
        Ok(())
    }
}
