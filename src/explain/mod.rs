//! Signal aggregation: turn one move event into a scored, explained record.
//!
//! `explain` is an idempotent read-or-generate: an existing explanation with
//! a usable narrative is returned as-is; one with a missing/failed narrative
//! gets only its narrative regenerated (stored factors are reused); otherwise
//! the full factor set, confidence, summary, and narrative are produced and
//! persisted.

pub mod narrative;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::ingest::{FxIngest, IngestOutcome, NewsIngest};
use crate::store::Stores;
use crate::types::{
    Confidence, Direction, Explanation, ExplainError, Factor, MoveEvent, NewsFeed, NewsHeadline,
    Result,
};
use narrative::NarrativeGenerator;

pub const NEWS_FACTOR: &str = "News activity";
pub const SENTIMENT_FACTOR: &str = "Market sentiment (Fear & Greed)";
pub const FX_FACTOR: &str = "FX context (EUR/USD)";
pub const WEATHER_FACTOR: &str = "Extreme weather signals (demo)";

const NEWS_COUNT_CAP: i64 = 200;
const FX_CHANGE_CAP: i64 = 200;
const HEADLINE_SAMPLE_LIMIT: usize = 20;

/// Regional source blocklist applied to headline URLs: country-code domain
/// suffixes and named outlets that skew non-English or low-relevance.
const BLOCKED_URL_MARKERS: &[&str] = &[
    ".jp/",
    ".jp?",
    ".kr/",
    ".kr?",
    ".cn/",
    ".cn?",
    ".ru/",
    ".ru?",
    ".ir/",
    ".tr/",
    ".br/",
    "segye.com",
    "asahi.com",
    "yomiuri.co.jp",
    "nikkei.com",
    "chosun.com",
    "baidu.com",
    "naver.com",
];

pub struct Explainer {
    stores: Stores,
    news_ingest: Arc<NewsIngest>,
    fx_ingest: Arc<FxIngest>,
    news_feed: Arc<dyn NewsFeed>,
    narrative: Arc<NarrativeGenerator>,
    config: Arc<AppConfig>,
}

impl Explainer {
    pub fn new(
        stores: Stores,
        news_ingest: Arc<NewsIngest>,
        fx_ingest: Arc<FxIngest>,
        news_feed: Arc<dyn NewsFeed>,
        narrative: Arc<NarrativeGenerator>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            stores,
            news_ingest,
            fx_ingest,
            news_feed,
            narrative,
            config,
        }
    }

    /// Return the stored explanation for an event, generating it on first
    /// request. A stored row whose narrative is missing or failed gets only
    /// its narrative regenerated; factors are never recomputed.
    pub async fn explain(&self, event_id: i64) -> Result<Explanation> {
        let existing = self.stores.explanations.find_by_event_id(event_id).await?;

        let Some(mut existing) = existing else {
            return self.generate(event_id).await;
        };

        if existing.narrative.is_usable() {
            return Ok(existing);
        }

        // Narrative-only retry: the row predates the feature or generation
        // failed last time.
        let event = self.require_event(event_id).await?;
        let (start, end) = self.window_around(event.event_date);
        existing.narrative = self
            .narrative
            .narrate(&event, &existing.factors, start, end)
            .await;
        if let Err(e) = self.stores.explanations.save(&existing).await {
            warn!("Failed to persist regenerated narrative for event {event_id}: {e}");
        }

        Ok(existing)
    }

    async fn generate(&self, event_id: i64) -> Result<Explanation> {
        let event = self.require_event(event_id).await?;
        let d = event.event_date;
        let (start, end) = self.window_around(d);

        // Signal rows may be missing for older events; backfill on demand.
        // Absence of a signal degrades its factor rather than failing the
        // request, so outcomes are only logged.
        let news_outcome = self.ensure_news_for(d).await;
        let fx_outcome = self.ensure_fx_for(d).await;
        debug!("Ensure outcomes for {d}: news={news_outcome:?}, fx={fx_outcome:?}");

        let news_stat = self.stores.news.find_stat(d).await?;
        let headlines = self
            .stores
            .news
            .find_headlines(d, HEADLINE_SAMPLE_LIMIT as u32)
            .await?;

        // Backfill the coverage share if the stat predates it.
        let news_stat = match news_stat {
            Some(mut stat) if stat.coverage_pct.is_none() => {
                match self.news_feed.fetch_coverage_pct(d, &stat.query_tag).await {
                    Ok(coverage) => {
                        stat.coverage_pct = Some(coverage);
                        if let Err(e) = self.stores.news.upsert_stat(&stat).await {
                            warn!("Failed to persist coverage share for {d}: {e}");
                        }
                    }
                    Err(e) => warn!("Coverage share fetch failed for {d}: {e}"),
                }
                Some(stat)
            }
            other => other,
        };

        let sentiment = self.stores.sentiment.find_by_date(d).await?;
        let fx = self.stores.fx.find_by_date(d, "EUR", "USD").await?;
        let fx_prev = self
            .stores
            .fx
            .find_by_date(d - Duration::days(1), "EUR", "USD")
            .await?;
        let weather = self.stores.weather.find_by_date(d).await?;

        // Factor scoring (0-100), intentionally simple.
        let mut factors: Vec<Factor> = Vec::new();

        // --- NEWS ---
        let news_count = news_stat.as_ref().map(|s| s.article_count).unwrap_or(0);
        if news_count > 0 || !headlines.is_empty() {
            let sample = filter_headlines(&headlines);

            let mut evidence = serde_json::Map::new();
            evidence.insert("articlesCount".to_string(), json!(news_count));
            if let Some(coverage) = news_stat.as_ref().and_then(|s| s.coverage_pct) {
                evidence.insert("coveragePct".to_string(), json!(coverage));
            }
            if let Some(stat) = &news_stat {
                evidence.insert("queryTag".to_string(), json!(stat.query_tag));
            }
            evidence.insert("sampleHeadlines".to_string(), json!(sample));

            if news_count == 0 && !sample.is_empty() {
                evidence.insert(
                    "note".to_string(),
                    json!(
                        "No raw count was available, but related headlines were found; \
                         showing titles as context."
                    ),
                );
            }

            factors.push(Factor {
                name: NEWS_FACTOR.to_string(),
                score: score_clamp(news_count as i64, NEWS_COUNT_CAP),
                evidence,
            });
        } else {
            let mut evidence = serde_json::Map::new();
            evidence.insert("articlesCount".to_string(), json!(0));
            evidence.insert(
                "explanation".to_string(),
                json!(format!(
                    "No matching crypto headlines were found for this exact date using the \
                     current query set. {} can still move due to technical trading \
                     (liquidations, stops), broader risk sentiment, or macro events.",
                    self.config.asset_symbol
                )),
            );
            evidence.insert("confidence".to_string(), json!("low"));
            factors.push(Factor {
                name: NEWS_FACTOR.to_string(),
                score: 10,
                evidence,
            });
        }

        // --- SENTIMENT ---
        if let Some(sentiment) = &sentiment {
            let mut evidence = serde_json::Map::new();
            evidence.insert("value".to_string(), json!(sentiment.value));
            evidence.insert(
                "classification".to_string(),
                json!(sentiment.classification),
            );
            factors.push(Factor {
                name: SENTIMENT_FACTOR.to_string(),
                score: 40,
                evidence,
            });
        } else {
            let mut evidence = serde_json::Map::new();
            evidence.insert("status".to_string(), json!("unavailable"));
            factors.push(Factor {
                name: SENTIMENT_FACTOR.to_string(),
                score: 0,
                evidence,
            });
        }

        // --- FX ---
        if let Some(fx) = &fx {
            let mut change_pct: Option<Decimal> = None;
            if let Some(prev) = &fx_prev {
                if prev.rate != Decimal::ZERO {
                    change_pct = Some(
                        ((fx.rate - prev.rate) / prev.rate)
                            .round_dp_with_strategy(8, RoundingStrategy::MidpointAwayFromZero)
                            * Decimal::from(100),
                    );
                }
            }

            let mut evidence = serde_json::Map::new();
            evidence.insert("eurUsdRate".to_string(), json!(fx.rate));
            if let Some(source_date) = fx.source_date {
                evidence.insert("sourceDate".to_string(), json!(source_date));
            }
            if let Some(change) = change_pct {
                let mut display =
                    change.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);
                display.rescale(4);
                evidence.insert("dayChangePct".to_string(), json!(display));
            }

            // A >= 1% daily move is notable for FX, hence abs% * 100 against
            // the same 200 cap.
            let score = match change_pct {
                Some(change) => score_clamp(
                    (change.abs() * Decimal::from(100))
                        .trunc()
                        .to_i64()
                        .unwrap_or(0),
                    FX_CHANGE_CAP,
                ),
                None => 20,
            };

            factors.push(Factor {
                name: FX_FACTOR.to_string(),
                score,
                evidence,
            });
        } else {
            let mut evidence = serde_json::Map::new();
            evidence.insert("status".to_string(), json!("unavailable"));
            evidence.insert(
                "explanation".to_string(),
                json!(
                    "FX rate data wasn't available for this date from the provider (possibly \
                     a holiday/weekend) and couldn't be backfilled."
                ),
            );
            evidence.insert("confidence".to_string(), json!("low"));
            factors.push(Factor {
                name: FX_FACTOR.to_string(),
                score: 5,
                evidence,
            });
        }

        // --- WEATHER (DEMO) ---
        if !weather.is_empty() {
            let signals: Vec<serde_json::Value> = weather
                .iter()
                .map(|w| {
                    json!({
                        "region": w.region_key,
                        "type": w.extreme_type,
                        "severity": w.severity,
                    })
                })
                .collect();
            let mut evidence = serde_json::Map::new();
            evidence.insert("signals".to_string(), json!(signals));
            factors.push(Factor {
                name: WEATHER_FACTOR.to_string(),
                score: 30,
                evidence,
            });
        } else {
            let mut evidence = serde_json::Map::new();
            evidence.insert("signals".to_string(), json!([]));
            factors.push(Factor {
                name: WEATHER_FACTOR.to_string(),
                score: 0,
                evidence,
            });
        }

        factors.sort_by(|a, b| b.score.cmp(&a.score));

        let total_score: i64 = factors.iter().map(|f| f.score).sum();
        let confidence =
            Confidence::from_total_score(total_score, self.config.confidence_threshold);

        let summary = self.render_summary(&event, &factors, start, end);
        let narrative = self.narrative.narrate(&event, &factors, start, end).await;

        let explanation = Explanation {
            event_id: event.id,
            confidence,
            summary_text: summary,
            factors,
            generated_at: Utc::now(),
            narrative,
        };

        self.stores.explanations.save(&explanation).await?;
        info!(
            "Generated explanation for event {event_id} (confidence {}, total score {total_score})",
            confidence.as_str()
        );
        Ok(explanation)
    }

    async fn require_event(&self, event_id: i64) -> Result<MoveEvent> {
        self.stores
            .events
            .find_by_id(event_id)
            .await?
            .ok_or_else(|| ExplainError::NotFound(format!("event {event_id}")))
    }

    fn window_around(&self, date: NaiveDate) -> (NaiveDate, NaiveDate) {
        (
            date - Duration::days(self.config.window_days_before as i64),
            date + Duration::days(self.config.window_days_after as i64),
        )
    }

    /// Make sure news rows exist for the date, ingesting on demand.
    async fn ensure_news_for(&self, date: NaiveDate) -> IngestOutcome {
        let missing_stat = match self.stores.news.find_stat(date).await {
            Ok(stat) => stat.is_none(),
            Err(e) => return IngestOutcome::Failed(e.to_string()),
        };
        let missing_headlines = match self
            .stores
            .news
            .find_headlines(date, HEADLINE_SAMPLE_LIMIT as u32)
            .await
        {
            Ok(items) => items.is_empty(),
            Err(e) => return IngestOutcome::Failed(e.to_string()),
        };

        if !missing_stat && !missing_headlines {
            return IngestOutcome::Skipped;
        }
        match self.news_ingest.ingest_for_date(date).await {
            Ok(()) => IngestOutcome::Ingested,
            Err(e) => {
                warn!("On-demand news ingest failed for {date}: {e}");
                IngestOutcome::Failed(e.to_string())
            }
        }
    }

    /// Make sure an FX row exists for the date, ingesting on demand.
    async fn ensure_fx_for(&self, date: NaiveDate) -> IngestOutcome {
        match self.stores.fx.find_by_date(date, "EUR", "USD").await {
            Ok(Some(_)) => IngestOutcome::Skipped,
            Ok(None) => match self.fx_ingest.ingest_eur_usd(date).await {
                Ok(()) => IngestOutcome::Ingested,
                Err(e) => {
                    warn!("On-demand FX ingest failed for {date}: {e}");
                    IngestOutcome::Failed(e.to_string())
                }
            },
            Err(e) => IngestOutcome::Failed(e.to_string()),
        }
    }

    fn render_summary(
        &self,
        event: &MoveEvent,
        factors: &[Factor],
        start: NaiveDate,
        end: NaiveDate,
    ) -> String {
        let pct = event.pct_display().abs();
        let dir_word = match event.direction {
            Direction::Up => "rose",
            Direction::Down => "fell",
        };
        let top = factors
            .first()
            .map(|f| f.name.as_str())
            .unwrap_or("No signals were available.");

        format!(
            "{} {} {}% on {}. This explanation looks for signals within {} to {}. \
             Top observed factor: {}. Note: this is an educational correlation-based \
             explanation, not financial advice.",
            self.config.asset_symbol, dir_word, pct, event.event_date, start, end, top
        )
    }
}

/// Clamp `value` into `[0, cap]`, then rescale linearly to `[0, 100]`.
pub fn score_clamp(value: i64, cap: i64) -> i64 {
    let v = value.clamp(0, cap);
    ((v as f64 / cap as f64) * 100.0).round() as i64
}

/// Headline filter applied before sampling for the news factor: English-only
/// heuristic, URL blocklist, title de-duplication, and a cap of 20.
fn filter_headlines(headlines: &[NewsHeadline]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out: Vec<String> = Vec::new();

    for headline in headlines {
        if !is_likely_english(&headline.title) {
            continue;
        }
        if let Some(url) = &headline.url {
            let lower = url.to_lowercase();
            if BLOCKED_URL_MARKERS.iter().any(|m| lower.contains(m)) {
                continue;
            }
        }
        if !seen.insert(headline.title.as_str()) {
            continue;
        }
        out.push(headline.title.clone());
        if out.len() == HEADLINE_SAMPLE_LIMIT {
            break;
        }
    }

    out
}

/// Language heuristic: at most 10% of the characters may be non-ASCII.
fn is_likely_english(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    let total = text.chars().count();
    let non_ascii = text.chars().filter(|c| !c.is_ascii()).count();
    (non_ascii as f64) <= (total as f64) * 0.1
}
