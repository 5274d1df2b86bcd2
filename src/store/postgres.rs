//! sqlx-backed store implementations.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;

use crate::store::{
    CandleStore, EventStore, ExplanationStore, FxStore, NewsStore, SentimentStore, WeatherStore,
};
use crate::types::{
    Confidence, DailyCandle, Direction, Explanation, Factor, FxSnapshot, MoveEvent, Narrative,
    NarrativeSource, NewMoveEvent, NewsHeadline, NewsStat, Result, SentimentSnapshot,
    WeatherExtreme,
};

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await?;

    Ok(pool)
}

pub struct PgCandleStore {
    pool: PgPool,
}

impl PgCandleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct CandleRow {
    asset: String,
    candle_date: NaiveDate,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Option<Decimal>,
}

impl From<CandleRow> for DailyCandle {
    fn from(r: CandleRow) -> Self {
        DailyCandle {
            asset: r.asset,
            candle_date: r.candle_date,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
        }
    }
}

#[async_trait::async_trait]
impl CandleStore for PgCandleStore {
    async fn find_from(&self, asset: &str, start: NaiveDate) -> Result<Vec<DailyCandle>> {
        let rows: Vec<CandleRow> = sqlx::query_as(
            "SELECT asset, candle_date, open, high, low, close, volume
             FROM daily_candles WHERE asset = $1 AND candle_date >= $2
             ORDER BY candle_date",
        )
        .bind(asset)
        .bind(start)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(DailyCandle::from).collect())
    }

    async fn upsert(&self, candle: &DailyCandle) -> Result<()> {
        sqlx::query(
            "INSERT INTO daily_candles (asset, candle_date, open, high, low, close, volume)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (asset, candle_date) DO UPDATE
             SET open = EXCLUDED.open, high = EXCLUDED.high,
                 low = EXCLUDED.low, close = EXCLUDED.close, volume = EXCLUDED.volume",
        )
        .bind(&candle.asset)
        .bind(candle.candle_date)
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct EventRow {
    id: i64,
    asset: String,
    event_date: NaiveDate,
    direction: String,
    pct_change: Decimal,
    threshold_used: String,
    severity: i16,
    created_at: DateTime<Utc>,
}

impl From<EventRow> for MoveEvent {
    fn from(r: EventRow) -> Self {
        MoveEvent {
            id: r.id,
            asset: r.asset,
            event_date: r.event_date,
            direction: Direction::from_str_or_up(&r.direction),
            pct_change: r.pct_change,
            threshold_used: r.threshold_used,
            severity: r.severity,
            created_at: r.created_at,
        }
    }
}

const EVENT_COLUMNS: &str =
    "id, asset, event_date, direction, pct_change, threshold_used, severity, created_at";

#[async_trait::async_trait]
impl EventStore for PgEventStore {
    async fn find_from(&self, asset: &str, start: NaiveDate) -> Result<Vec<MoveEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM move_events
             WHERE asset = $1 AND event_date >= $2 ORDER BY event_date"
        ))
        .bind(asset)
        .bind(start)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MoveEvent::from).collect())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<MoveEvent>> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {EVENT_COLUMNS} FROM move_events WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(MoveEvent::from))
    }

    async fn find_latest(&self, asset: &str, limit: u32) -> Result<Vec<MoveEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM move_events
             WHERE asset = $1 ORDER BY event_date DESC LIMIT $2"
        ))
        .bind(asset)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MoveEvent::from).collect())
    }

    async fn upsert(&self, event: &NewMoveEvent) -> Result<MoveEvent> {
        let row: EventRow = sqlx::query_as(&format!(
            "INSERT INTO move_events (asset, event_date, direction, pct_change, threshold_used, severity)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (asset, event_date) DO UPDATE
             SET direction = EXCLUDED.direction, pct_change = EXCLUDED.pct_change,
                 threshold_used = EXCLUDED.threshold_used, severity = EXCLUDED.severity
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(&event.asset)
        .bind(event.event_date)
        .bind(event.direction.as_str())
        .bind(event.pct_change)
        .bind(&event.threshold_used)
        .bind(event.severity)
        .fetch_one(&self.pool)
        .await?;

        Ok(MoveEvent::from(row))
    }
}

pub struct PgExplanationStore {
    pool: PgPool,
}

impl PgExplanationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ExplanationRow {
    event_id: i64,
    confidence: String,
    summary_text: String,
    factors_json: String,
    generated_at: DateTime<Utc>,
    narrative_text: Option<String>,
    narrative_source: String,
    narrative_model: Option<String>,
    narrative_generated_at: Option<DateTime<Utc>>,
    narrative_error: Option<String>,
}

impl TryFrom<ExplanationRow> for Explanation {
    type Error = crate::types::ExplainError;

    fn try_from(r: ExplanationRow) -> Result<Self> {
        let factors: Vec<Factor> = serde_json::from_str(&r.factors_json)?;
        Ok(Explanation {
            event_id: r.event_id,
            confidence: Confidence::from_str_or_low(&r.confidence),
            summary_text: r.summary_text,
            factors,
            generated_at: r.generated_at,
            narrative: Narrative {
                text: r.narrative_text,
                source: NarrativeSource::from_str_or_none(&r.narrative_source),
                model: r.narrative_model,
                generated_at: r.narrative_generated_at,
                error_message: r.narrative_error,
            },
        })
    }
}

#[async_trait::async_trait]
impl ExplanationStore for PgExplanationStore {
    async fn find_by_event_id(&self, event_id: i64) -> Result<Option<Explanation>> {
        let row: Option<ExplanationRow> = sqlx::query_as(
            "SELECT event_id, confidence, summary_text, factors_json, generated_at,
                    narrative_text, narrative_source, narrative_model,
                    narrative_generated_at, narrative_error
             FROM event_explanations WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Explanation::try_from).transpose()
    }

    async fn save(&self, explanation: &Explanation) -> Result<()> {
        // Factors are a typed list everywhere else; they become JSON text
        // only here, at the persistence boundary.
        let factors_json = serde_json::to_string(&explanation.factors)?;

        sqlx::query(
            "INSERT INTO event_explanations
                 (event_id, confidence, summary_text, factors_json, generated_at,
                  narrative_text, narrative_source, narrative_model,
                  narrative_generated_at, narrative_error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (event_id) DO UPDATE
             SET confidence = EXCLUDED.confidence,
                 summary_text = EXCLUDED.summary_text,
                 factors_json = EXCLUDED.factors_json,
                 generated_at = EXCLUDED.generated_at,
                 narrative_text = EXCLUDED.narrative_text,
                 narrative_source = EXCLUDED.narrative_source,
                 narrative_model = EXCLUDED.narrative_model,
                 narrative_generated_at = EXCLUDED.narrative_generated_at,
                 narrative_error = EXCLUDED.narrative_error",
        )
        .bind(explanation.event_id)
        .bind(explanation.confidence.as_str())
        .bind(&explanation.summary_text)
        .bind(factors_json)
        .bind(explanation.generated_at)
        .bind(&explanation.narrative.text)
        .bind(explanation.narrative.source.as_str())
        .bind(&explanation.narrative.model)
        .bind(explanation.narrative.generated_at)
        .bind(&explanation.narrative.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct PgNewsStore {
    pool: PgPool,
}

impl PgNewsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct NewsStatRow {
    stat_date: NaiveDate,
    query_tag: String,
    article_count: i32,
    coverage_pct: Option<f64>,
}

#[derive(FromRow)]
struct HeadlineRow {
    item_date: NaiveDate,
    title: String,
    source: Option<String>,
    url: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

#[async_trait::async_trait]
impl NewsStore for PgNewsStore {
    async fn find_stat(&self, date: NaiveDate) -> Result<Option<NewsStat>> {
        let row: Option<NewsStatRow> = sqlx::query_as(
            "SELECT stat_date, query_tag, article_count, coverage_pct
             FROM news_daily_stats WHERE stat_date = $1",
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| NewsStat {
            stat_date: r.stat_date,
            query_tag: r.query_tag,
            article_count: r.article_count,
            coverage_pct: r.coverage_pct,
        }))
    }

    async fn upsert_stat(&self, stat: &NewsStat) -> Result<()> {
        sqlx::query(
            "INSERT INTO news_daily_stats (stat_date, query_tag, article_count, coverage_pct)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (stat_date) DO UPDATE
             SET query_tag = EXCLUDED.query_tag,
                 article_count = EXCLUDED.article_count,
                 coverage_pct = EXCLUDED.coverage_pct",
        )
        .bind(stat.stat_date)
        .bind(&stat.query_tag)
        .bind(stat.article_count)
        .bind(stat.coverage_pct)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_headlines(&self, date: NaiveDate, limit: u32) -> Result<Vec<NewsHeadline>> {
        let rows: Vec<HeadlineRow> = sqlx::query_as(
            "SELECT item_date, title, source, url, published_at
             FROM news_headlines WHERE item_date = $1
             ORDER BY published_at DESC NULLS LAST LIMIT $2",
        )
        .bind(date)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| NewsHeadline {
                item_date: r.item_date,
                title: r.title,
                source: r.source,
                url: r.url,
                published_at: r.published_at,
            })
            .collect())
    }

    async fn replace_headlines(&self, date: NaiveDate, items: &[NewsHeadline]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM news_headlines WHERE item_date = $1")
            .bind(date)
            .execute(&mut *tx)
            .await?;

        for item in items {
            sqlx::query(
                "INSERT INTO news_headlines (item_date, title, source, url, published_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(date)
            .bind(&item.title)
            .bind(&item.source)
            .bind(&item.url)
            .bind(item.published_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

pub struct PgSentimentStore {
    pool: PgPool,
}

impl PgSentimentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct SentimentRow {
    sentiment_date: NaiveDate,
    value: i32,
    classification: String,
}

#[async_trait::async_trait]
impl SentimentStore for PgSentimentStore {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Option<SentimentSnapshot>> {
        let row: Option<SentimentRow> = sqlx::query_as(
            "SELECT sentiment_date, value, classification
             FROM sentiment_daily WHERE sentiment_date = $1",
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SentimentSnapshot {
            sentiment_date: r.sentiment_date,
            value: r.value,
            classification: r.classification,
        }))
    }

    async fn upsert(&self, snapshot: &SentimentSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO sentiment_daily (sentiment_date, value, classification)
             VALUES ($1, $2, $3)
             ON CONFLICT (sentiment_date) DO UPDATE
             SET value = EXCLUDED.value, classification = EXCLUDED.classification",
        )
        .bind(snapshot.sentiment_date)
        .bind(snapshot.value)
        .bind(&snapshot.classification)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct PgFxStore {
    pool: PgPool,
}

impl PgFxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct FxRow {
    rate_date: NaiveDate,
    source_date: Option<NaiveDate>,
    base: String,
    quote: String,
    rate: Decimal,
}

#[async_trait::async_trait]
impl FxStore for PgFxStore {
    async fn find_by_date(
        &self,
        date: NaiveDate,
        base: &str,
        quote: &str,
    ) -> Result<Option<FxSnapshot>> {
        let row: Option<FxRow> = sqlx::query_as(
            "SELECT rate_date, source_date, base, quote, rate
             FROM fx_rates_daily WHERE rate_date = $1 AND base = $2 AND quote = $3",
        )
        .bind(date)
        .bind(base)
        .bind(quote)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| FxSnapshot {
            rate_date: r.rate_date,
            source_date: r.source_date,
            base: r.base,
            quote: r.quote,
            rate: r.rate,
        }))
    }

    async fn upsert(&self, snapshot: &FxSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO fx_rates_daily (rate_date, source_date, base, quote, rate)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (rate_date, base, quote) DO UPDATE
             SET source_date = EXCLUDED.source_date, rate = EXCLUDED.rate",
        )
        .bind(snapshot.rate_date)
        .bind(snapshot.source_date)
        .bind(&snapshot.base)
        .bind(&snapshot.quote)
        .bind(snapshot.rate)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub struct PgWeatherStore {
    pool: PgPool,
}

impl PgWeatherStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct WeatherRow {
    wx_date: NaiveDate,
    region_key: String,
    extreme_type: String,
    severity: Option<f64>,
}

#[async_trait::async_trait]
impl WeatherStore for PgWeatherStore {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Vec<WeatherExtreme>> {
        let rows: Vec<WeatherRow> = sqlx::query_as(
            "SELECT wx_date, region_key, extreme_type, severity
             FROM weather_extremes_daily WHERE wx_date = $1
             ORDER BY region_key, extreme_type",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| WeatherExtreme {
                wx_date: r.wx_date,
                region_key: r.region_key,
                extreme_type: r.extreme_type,
                severity: r.severity,
            })
            .collect())
    }

    async fn upsert(&self, extreme: &WeatherExtreme) -> Result<()> {
        sqlx::query(
            "INSERT INTO weather_extremes_daily (wx_date, region_key, extreme_type, severity)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (wx_date, region_key, extreme_type) DO UPDATE
             SET severity = EXCLUDED.severity",
        )
        .bind(extreme.wx_date)
        .bind(&extreme.region_key)
        .bind(&extreme.extreme_type)
        .bind(extreme.severity)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
