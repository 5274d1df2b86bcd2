//! Persistence boundary.
//!
//! The pipeline only sees these traits; the Postgres implementation funnels
//! every write through `ON CONFLICT` upserts so that concurrent writers treat
//! a uniqueness violation as "already handled" rather than a fatal error.

pub mod memory;
pub mod postgres;

use chrono::NaiveDate;
use std::sync::Arc;

use crate::types::{
    DailyCandle, Explanation, FxSnapshot, MoveEvent, NewMoveEvent, NewsHeadline, NewsStat, Result,
    SentimentSnapshot, WeatherExtreme,
};

#[async_trait::async_trait]
pub trait CandleStore: Send + Sync {
    async fn find_from(&self, asset: &str, start: NaiveDate) -> Result<Vec<DailyCandle>>;
    async fn upsert(&self, candle: &DailyCandle) -> Result<()>;
}

#[async_trait::async_trait]
pub trait EventStore: Send + Sync {
    async fn find_from(&self, asset: &str, start: NaiveDate) -> Result<Vec<MoveEvent>>;
    async fn find_by_id(&self, id: i64) -> Result<Option<MoveEvent>>;
    /// Newest events first.
    async fn find_latest(&self, asset: &str, limit: u32) -> Result<Vec<MoveEvent>>;
    async fn upsert(&self, event: &NewMoveEvent) -> Result<MoveEvent>;
}

#[async_trait::async_trait]
pub trait ExplanationStore: Send + Sync {
    async fn find_by_event_id(&self, event_id: i64) -> Result<Option<Explanation>>;
    /// Insert or overwrite the explanation for its event id.
    async fn save(&self, explanation: &Explanation) -> Result<()>;
}

#[async_trait::async_trait]
pub trait NewsStore: Send + Sync {
    async fn find_stat(&self, date: NaiveDate) -> Result<Option<NewsStat>>;
    async fn upsert_stat(&self, stat: &NewsStat) -> Result<()>;
    /// Headlines for the date, most recently published first.
    async fn find_headlines(&self, date: NaiveDate, limit: u32) -> Result<Vec<NewsHeadline>>;
    /// Replace the stored headline sample for the date.
    async fn replace_headlines(&self, date: NaiveDate, items: &[NewsHeadline]) -> Result<()>;
}

#[async_trait::async_trait]
pub trait SentimentStore: Send + Sync {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Option<SentimentSnapshot>>;
    async fn upsert(&self, snapshot: &SentimentSnapshot) -> Result<()>;
}

#[async_trait::async_trait]
pub trait FxStore: Send + Sync {
    async fn find_by_date(
        &self,
        date: NaiveDate,
        base: &str,
        quote: &str,
    ) -> Result<Option<FxSnapshot>>;
    async fn upsert(&self, snapshot: &FxSnapshot) -> Result<()>;
}

#[async_trait::async_trait]
pub trait WeatherStore: Send + Sync {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Vec<WeatherExtreme>>;
    async fn upsert(&self, extreme: &WeatherExtreme) -> Result<()>;
}

/// Bundle of store handles injected into the pipeline components.
#[derive(Clone)]
pub struct Stores {
    pub candles: Arc<dyn CandleStore>,
    pub events: Arc<dyn EventStore>,
    pub explanations: Arc<dyn ExplanationStore>,
    pub news: Arc<dyn NewsStore>,
    pub sentiment: Arc<dyn SentimentStore>,
    pub fx: Arc<dyn FxStore>,
    pub weather: Arc<dyn WeatherStore>,
}

impl Stores {
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            candles: Arc::new(postgres::PgCandleStore::new(pool.clone())),
            events: Arc::new(postgres::PgEventStore::new(pool.clone())),
            explanations: Arc::new(postgres::PgExplanationStore::new(pool.clone())),
            news: Arc::new(postgres::PgNewsStore::new(pool.clone())),
            sentiment: Arc::new(postgres::PgSentimentStore::new(pool.clone())),
            fx: Arc::new(postgres::PgFxStore::new(pool.clone())),
            weather: Arc::new(postgres::PgWeatherStore::new(pool)),
        }
    }

    /// In-memory stores; used by tests and local experiments.
    pub fn in_memory() -> Self {
        Self {
            candles: Arc::new(memory::MemoryCandleStore::default()),
            events: Arc::new(memory::MemoryEventStore::default()),
            explanations: Arc::new(memory::MemoryExplanationStore::default()),
            news: Arc::new(memory::MemoryNewsStore::default()),
            sentiment: Arc::new(memory::MemorySentimentStore::default()),
            fx: Arc::new(memory::MemoryFxStore::default()),
            weather: Arc::new(memory::MemoryWeatherStore::default()),
        }
    }
}
