use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One UTC day of OHLC data for the tracked asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyCandle {
    pub asset: String,
    pub candle_date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Option<Decimal>,
}

/// Direction of a daily move. A flat day (0%) counts as Up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }

    pub fn from_str_or_up(s: &str) -> Self {
        if s.eq_ignore_ascii_case("DOWN") {
            Direction::Down
        } else {
            Direction::Up
        }
    }
}

/// A day whose absolute percentage change crossed a configured threshold.
/// Unique per (asset, event_date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveEvent {
    pub id: i64,
    pub asset: String,
    pub event_date: NaiveDate,
    pub direction: Direction,
    /// Daily return in percent, 4 decimals, half-up.
    pub pct_change: Decimal,
    pub threshold_used: String,
    /// Integer floor of the matched threshold (4 = very strong, 3 = strong, 2 = moderate).
    pub severity: i16,
    pub created_at: DateTime<Utc>,
}

impl MoveEvent {
    /// Percent change rounded half-up to a fixed 2 decimals for display.
    pub fn pct_display(&self) -> Decimal {
        let mut v = self
            .pct_change
            .round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
        v.rescale(2);
        v
    }
}

/// Fields of a move event before it has been persisted.
#[derive(Debug, Clone)]
pub struct NewMoveEvent {
    pub asset: String,
    pub event_date: NaiveDate,
    pub direction: Direction,
    pub pct_change: Decimal,
    pub threshold_used: String,
    pub severity: i16,
}

/// Coarse label summarizing how much corroborating signal was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Med,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "LOW",
            Confidence::Med => "MED",
        }
    }

    /// Monotonic in total factor score: at or above the threshold means MED.
    pub fn from_total_score(total: i64, threshold: i64) -> Self {
        if total >= threshold {
            Confidence::Med
        } else {
            Confidence::Low
        }
    }

    pub fn from_str_or_low(s: &str) -> Self {
        if s.eq_ignore_ascii_case("MED") {
            Confidence::Med
        } else {
            Confidence::Low
        }
    }
}

/// One named, scored piece of evidence used to explain a move.
///
/// Evidence content is signal-specific (counts, classifications, rates,
/// headline samples); the factor always carries name + score + evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    /// 0-100 after clamping/rescaling.
    pub score: i64,
    pub evidence: serde_json::Map<String, serde_json::Value>,
}

/// Where the narrative text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NarrativeSource {
    Ai,
    Fallback,
    None,
}

impl NarrativeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            NarrativeSource::Ai => "AI",
            NarrativeSource::Fallback => "FALLBACK",
            NarrativeSource::None => "NONE",
        }
    }

    pub fn from_str_or_none(s: &str) -> Self {
        if s.eq_ignore_ascii_case("AI") {
            NarrativeSource::Ai
        } else if s.eq_ignore_ascii_case("FALLBACK") {
            NarrativeSource::Fallback
        } else {
            NarrativeSource::None
        }
    }
}

/// Human-readable explanation text plus provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narrative {
    pub text: Option<String>,
    pub source: NarrativeSource,
    pub model: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Narrative {
    /// A narrative is usable when it has text and a non-NONE source.
    pub fn is_usable(&self) -> bool {
        self.text.is_some() && self.source != NarrativeSource::None
    }
}

/// One explanation record per move event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub event_id: i64,
    pub confidence: Confidence,
    pub summary_text: String,
    /// Sorted by descending score before persistence.
    pub factors: Vec<Factor>,
    pub generated_at: DateTime<Utc>,
    pub narrative: Narrative,
}

/// Daily news volume snapshot for the tracked topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsStat {
    pub stat_date: NaiveDate,
    pub query_tag: String,
    /// Raw article count, or an effective count when only headlines were found.
    pub article_count: i32,
    /// Share of all global news coverage (fractional percent), if captured.
    pub coverage_pct: Option<f64>,
}

/// One sampled headline for a date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsHeadline {
    pub item_date: NaiveDate,
    pub title: String,
    pub source: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Daily Fear & Greed reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    pub sentiment_date: NaiveDate,
    pub value: i32,
    pub classification: String,
}

/// Daily FX rate. `source_date` records the actual provider date when a
/// weekend/holiday gap was backfilled from a previous business day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxSnapshot {
    pub rate_date: NaiveDate,
    pub source_date: Option<NaiveDate>,
    pub base: String,
    pub quote: String,
    pub rate: Decimal,
}

/// One extreme-weather row per (date, region, type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherExtreme {
    pub wx_date: NaiveDate,
    pub region_key: String,
    pub extreme_type: String,
    pub severity: Option<f64>,
}

/// Raw OHLC row as returned by the price provider.
#[derive(Debug, Clone)]
pub struct OhlcRow {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Article record as returned by the news provider.
#[derive(Debug, Clone)]
pub struct NewsArticle {
    pub title: String,
    pub source_country: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Daily weather reading for one coordinate.
#[derive(Debug, Clone, Copy)]
pub struct DailyWeather {
    pub tmax_c: f64,
    pub precip_mm: f64,
    pub wind_max_kmh: f64,
}

/// Successful reply from the narrative backend.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: String,
    pub model_used: String,
}

/// Error taxonomy for the explanation engine
#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    /// Signal-source failure. Never fatal for an explanation: the affected
    /// factor degrades to its documented "unavailable" shape instead.
    #[error("{provider} request failed: {message}")]
    Upstream {
        provider: &'static str,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// Factor set could not be encoded for storage. Fatal for the attempt.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ExplainError {
    pub fn upstream(provider: &'static str, message: impl Into<String>) -> Self {
        ExplainError::Upstream {
            provider,
            message: message.into(),
        }
    }
}

/// Result type for explanation-engine operations
pub type Result<T> = std::result::Result<T, ExplainError>;

/// Narrative backend failures. Never propagated to callers of `narrate` -
/// they resolve to the deterministic fallback with the message captured.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("narrative backend is disabled")]
    Disabled,

    #[error("narrative backend API key is not configured")]
    MissingApiKey,

    #[error("narrative backend HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("narrative backend transport error: {0}")]
    Transport(String),

    #[error("narrative backend response could not be parsed: {0}")]
    Parse(String),
}

/// Trait for daily price providers
#[async_trait::async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetch OHLC rows covering the last `days` days.
    async fn fetch_daily_candles(&self, days: u32) -> Result<Vec<OhlcRow>>;
}

/// Trait for news volume/headline providers
#[async_trait::async_trait]
pub trait NewsFeed: Send + Sync {
    /// Raw count of matching articles for a single UTC day.
    async fn fetch_count(&self, date: NaiveDate, query: &str) -> Result<u64>;

    /// Share of all global news coverage for the day (fractional percent).
    async fn fetch_coverage_pct(&self, date: NaiveDate, query: &str) -> Result<f64>;

    /// Top matching articles for the day.
    async fn fetch_headlines(
        &self,
        date: NaiveDate,
        query: &str,
        max_records: u32,
    ) -> Result<Vec<NewsArticle>>;
}

/// Trait for daily FX rate providers
#[async_trait::async_trait]
pub trait FxFeed: Send + Sync {
    /// Rate for the date; `None` when the provider has no value (weekend/holiday).
    async fn fetch_rate(&self, date: NaiveDate) -> Result<Option<Decimal>>;
}

/// Trait for sentiment index providers
#[async_trait::async_trait]
pub trait SentimentFeed: Send + Sync {
    async fn fetch_latest(&self) -> Result<Option<SentimentSnapshot>>;
}

/// Trait for daily weather providers
#[async_trait::async_trait]
pub trait WeatherFeed: Send + Sync {
    async fn fetch_daily(
        &self,
        date: NaiveDate,
        lat: f64,
        lon: f64,
    ) -> Result<Option<DailyWeather>>;
}

/// Trait for the AI narrative backend
#[async_trait::async_trait]
pub trait NarrativeBackend: Send + Sync {
    async fn chat(
        &self,
        prompt: &str,
        temperature: f64,
    ) -> std::result::Result<ChatReply, BackendError>;
}
