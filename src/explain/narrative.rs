//! Narrative generation.
//!
//! Prefers the AI backend but always has a deterministic rule-based paragraph
//! ready, so `narrate` never fails the caller and never returns empty text.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::config::AppConfig;
use crate::types::{
    Confidence, Direction, Factor, MoveEvent, Narrative, NarrativeBackend, NarrativeSource,
};

const MAX_NARRATIVE_CHARS: usize = 900;
const MAX_ERROR_CHARS: usize = 600;
const PROMPT_TEMPERATURE: f64 = 0.35;

pub struct NarrativeGenerator {
    backend: Arc<dyn NarrativeBackend>,
    config: Arc<AppConfig>,
}

impl NarrativeGenerator {
    pub fn new(backend: Arc<dyn NarrativeBackend>, config: Arc<AppConfig>) -> Self {
        Self { backend, config }
    }

    /// Produce a narrative for the event. Always returns a usable result:
    /// the AI text when the backend succeeds, otherwise the deterministic
    /// fallback with the failure captured in `error_message`.
    pub async fn narrate(
        &self,
        event: &MoveEvent,
        factors: &[Factor],
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> Narrative {
        let fallback = self.fallback_narrative(event, factors);
        let prompt = self.build_prompt(event, factors, window_start, window_end, &fallback);

        match self.backend.chat(&prompt, PROMPT_TEMPERATURE).await {
            Ok(reply) => {
                let cleaned = clean(&reply.content);
                if cleaned.is_empty() {
                    Narrative {
                        text: Some(fallback),
                        source: NarrativeSource::Fallback,
                        model: None,
                        generated_at: Some(Utc::now()),
                        error_message: Some("backend returned empty text".to_string()),
                    }
                } else {
                    Narrative {
                        text: Some(cleaned),
                        source: NarrativeSource::Ai,
                        model: Some(reply.model_used),
                        generated_at: Some(Utc::now()),
                        error_message: None,
                    }
                }
            }
            Err(e) => {
                warn!("Narrative backend failed for event {}: {e}", event.id);
                Narrative {
                    text: Some(fallback),
                    source: NarrativeSource::Fallback,
                    model: None,
                    generated_at: Some(Utc::now()),
                    error_message: Some(truncate_chars(&e.to_string(), MAX_ERROR_CHARS)),
                }
            }
        }
    }

    fn build_prompt(
        &self,
        event: &MoveEvent,
        factors: &[Factor],
        window_start: NaiveDate,
        window_end: NaiveDate,
        fallback: &str,
    ) -> String {
        let pct = event.pct_display().abs();
        let dir_word = direction_word(event.direction);

        let factors_json = match serde_json::to_string_pretty(factors) {
            Ok(s) => s,
            Err(_) => format!("{factors:?}"),
        };

        format!(
            "You are a market-explanation assistant writing for everyday users.\n\
             \n\
             TASK:\n\
             Write ONE clear, readable paragraph (6-8 sentences) explaining why {name} moved on the given date.\n\
             \n\
             LANGUAGE & TONE:\n\
             - Use simple, plain English\n\
             - Neutral and explanatory (not persuasive)\n\
             - No financial advice\n\
             - No predictions about the future\n\
             \n\
             STRUCTURE (IMPORTANT):\n\
             - Sentence 1: State what happened to the price.\n\
             - Sentences 2-4: Explain the MAIN NEWS THEMES found in the headlines.\n\
               If headlines mention institutional activity, clearly explain what those actions were and why markets might react.\n\
               Do not list headlines, but explain their meaning in plain language.\n\
             - Sentence 5: Briefly mention other signals (sentiment, FX, etc.) if relevant.\n\
             - Sentences 6-7: Explain uncertainty or weak signals if confidence is LOW.\n\
             - Final sentence: State that this is an educational, correlation-based explanation, not advice.\n\
             \n\
             CONTEXT:\n\
             - {symbol} {dir_word} {pct}% on {date}.\n\
             - Analysis window: {start} to {end}.\n\
             \n\
             SIGNALS & NEWS DATA (use ONLY this information):\n\
             {factors_json}\n\
             \n\
             If news coverage is limited or mixed, explain that clearly rather than filling with generic text.\n\
             \n\
             Do NOT output bullet points.\n\
             Do NOT output JSON.\n\
             Do NOT mention being an AI.\n\
             \n\
             Example fallback style (do NOT copy text):\n\
             {fallback}\n",
            name = self.config.asset_name,
            symbol = self.config.asset_symbol,
            dir_word = dir_word,
            pct = pct,
            date = event.event_date,
            start = window_start,
            end = window_end,
            factors_json = factors_json,
            fallback = fallback,
        )
    }

    /// Deterministic paragraph synthesized from the factor set. Also serves
    /// as the style example embedded in the AI prompt.
    pub fn fallback_narrative(&self, event: &MoveEvent, factors: &[Factor]) -> String {
        let pct = event.pct_display().abs();
        let dir_word = direction_word(event.direction);

        let news = find_factor("News activity", factors);
        let sentiment = find_factor("Market sentiment (Fear & Greed)", factors);
        let fx = find_factor("FX context (EUR/USD)", factors);

        let mut text = format!(
            "{} {} {}% on {}. ",
            self.config.asset_name, dir_word, pct, event.event_date
        );

        if let Some(sentiment) = sentiment {
            let classification = sentiment.evidence.get("classification");
            let value = sentiment.evidence.get("value");
            if let (Some(classification), Some(value)) = (classification, value) {
                text.push_str(&format!(
                    "The Fear & Greed index was in the '{}' range (value {}), suggesting a cautious backdrop. ",
                    as_plain_text(classification),
                    as_plain_text(value)
                ));
            }
        }

        let headlines = extract_headlines(news);
        if !headlines.is_empty() {
            text.push_str(&format!(
                "News coverage around the date mainly focused on {}. ",
                infer_themes(&headlines)
            ));
        } else {
            text.push_str(
                "There were few strong news signals tied to this exact date, so the move could \
                 be more about short-term positioning and technical trading. ",
            );
        }

        if let Some(fx) = fx {
            if let Some(day_change) = fx.evidence.get("dayChangePct") {
                text.push_str(&format!(
                    "EUR/USD also moved {}% on the day, which can slightly influence broader risk sentiment. ",
                    as_plain_text(day_change)
                ));
            }
        }

        let total: i64 = factors.iter().map(|f| f.score).sum();
        let confidence = Confidence::from_total_score(total, self.config.confidence_threshold);
        text.push_str(&format!(
            "Overall confidence is {}, so treat this as an educational, correlation-based summary rather than advice.",
            confidence.as_str()
        ));

        collapse_whitespace(&text)
    }
}

fn direction_word(direction: Direction) -> &'static str {
    match direction {
        Direction::Up => "rose",
        Direction::Down => "fell",
    }
}

fn find_factor<'a>(name: &str, factors: &'a [Factor]) -> Option<&'a Factor> {
    factors.iter().find(|f| f.name == name)
}

/// JSON scalars rendered without surrounding quotes.
fn as_plain_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn extract_headlines(news: Option<&Factor>) -> Vec<String> {
    let Some(news) = news else {
        return Vec::new();
    };
    let Some(sample) = news.evidence.get("sampleHeadlines").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    sample
        .iter()
        .filter_map(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .take(8)
        .map(|s| s.to_string())
        .collect()
}

/// Small deterministic theme extractor over the headline sample.
fn infer_themes(headlines: &[String]) -> String {
    let has_etf = contains_any(headlines, &["etf", "etfs"]);
    let has_liquidations = contains_any(headlines, &["liquidation", "liquidations"]);
    let has_institutional = contains_any(
        headlines,
        &[
            "strategy",
            "microstrategy",
            "bernstein",
            "analyst",
            "analysts",
            "pads cash",
            "reserve",
        ],
    );
    let has_security = contains_any(headlines, &["quantum", "wallet", "cold wallet", "security"]);
    let has_altcoins = contains_any(headlines, &["altcoin", "xrp", "dogecoin"]);

    let mut themes: Vec<&str> = Vec::new();
    if has_institutional {
        themes.push("institutional and analyst commentary");
    }
    if has_liquidations {
        themes.push("derivatives and liquidation dynamics");
    }
    if has_etf {
        themes.push("ETF flows and broader market participation");
    }
    if has_security {
        themes.push("security and longer-term protocol concerns");
    }
    if has_altcoins {
        themes.push("spillover discussions across major crypto assets");
    }
    if themes.is_empty() {
        themes.push("general crypto market developments");
    }

    match themes.len() {
        1 => themes[0].to_string(),
        2 => format!("{} and {}", themes[0], themes[1]),
        n => format!("{}, and {}", themes[..n - 1].join(", "), themes[n - 1]),
    }
}

fn contains_any(lines: &[String], needles: &[&str]) -> bool {
    lines.iter().any(|line| {
        let lower = line.to_lowercase();
        needles.iter().any(|needle| lower.contains(needle))
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse whitespace to single spaces, trim, and bound the length.
fn clean(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    truncate_chars(collapsed.trim(), MAX_NARRATIVE_CHARS)
        .trim()
        .to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackendError, ChatReply};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn test_config() -> Arc<AppConfig> {
        Arc::new(AppConfig {
            asset_symbol: "BTC".to_string(),
            asset_name: "Bitcoin".to_string(),
            coingecko_id: "bitcoin".to_string(),
            thresholds_csv: "4,3,2".to_string(),
            lookback_days: 180,
            mutable_days: 2,
            ingest_days: 180,
            window_days_before: 2,
            window_days_after: 1,
            confidence_threshold: 130,
            keep_last: 100,
            cache_ttl_secs: 21_600,
            refresh_interval_secs: 86_400,
            jobs_enabled: false,
            admin_token: String::new(),
            database_url: String::new(),
            port: 8080,
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".to_string(),
            openai_enabled: false,
        })
    }

    fn test_event() -> MoveEvent {
        MoveEvent {
            id: 7,
            asset: "BTC".to_string(),
            event_date: "2025-06-05".parse().unwrap(),
            direction: Direction::Up,
            pct_change: "4.1200".parse::<Decimal>().unwrap(),
            threshold_used: "abs(daily_return_pct) >= 4".to_string(),
            severity: 4,
            created_at: Utc::now(),
        }
    }

    fn factor(name: &str, score: i64, evidence: serde_json::Value) -> Factor {
        let serde_json::Value::Object(map) = evidence else {
            panic!("evidence must be an object");
        };
        Factor {
            name: name.to_string(),
            score,
            evidence: map,
        }
    }

    enum StubReply {
        Text(String),
        Fail(String),
    }

    struct StubBackend {
        reply: StubReply,
    }

    #[async_trait::async_trait]
    impl crate::types::NarrativeBackend for StubBackend {
        async fn chat(
            &self,
            _prompt: &str,
            _temperature: f64,
        ) -> std::result::Result<ChatReply, BackendError> {
            match &self.reply {
                StubReply::Text(text) => Ok(ChatReply {
                    content: text.clone(),
                    model_used: "gpt-4o-mini".to_string(),
                }),
                StubReply::Fail(message) => Err(BackendError::Transport(message.clone())),
            }
        }
    }

    fn generator(reply: StubReply) -> NarrativeGenerator {
        NarrativeGenerator::new(Arc::new(StubBackend { reply }), test_config())
    }

    fn window() -> (NaiveDate, NaiveDate) {
        ("2025-06-03".parse().unwrap(), "2025-06-06".parse().unwrap())
    }

    #[tokio::test]
    async fn backend_success_yields_ai_source() {
        let generator = generator(StubReply::Text(
            "Bitcoin rose sharply.\n\nCoverage   was broad.".to_string(),
        ));
        let (start, end) = window();
        let narrative = generator.narrate(&test_event(), &[], start, end).await;

        assert_eq!(narrative.source, NarrativeSource::Ai);
        assert_eq!(
            narrative.text.as_deref(),
            Some("Bitcoin rose sharply. Coverage was broad.")
        );
        assert_eq!(narrative.model.as_deref(), Some("gpt-4o-mini"));
        assert!(narrative.error_message.is_none());
    }

    #[tokio::test]
    async fn backend_failure_yields_fallback_with_error() {
        let generator = generator(StubReply::Fail("x".repeat(700)));
        let (start, end) = window();
        let narrative = generator.narrate(&test_event(), &[], start, end).await;

        assert_eq!(narrative.source, NarrativeSource::Fallback);
        let text = narrative.text.unwrap();
        assert!(text.starts_with("Bitcoin rose 4.12% on 2025-06-05."));
        let error = narrative.error_message.unwrap();
        assert!(error.chars().count() <= 600);
    }

    #[tokio::test]
    async fn blank_backend_output_yields_fallback() {
        let generator = generator(StubReply::Text("   \n\t  ".to_string()));
        let (start, end) = window();
        let narrative = generator.narrate(&test_event(), &[], start, end).await;

        assert_eq!(narrative.source, NarrativeSource::Fallback);
        assert!(narrative.text.is_some());
        assert_eq!(
            narrative.error_message.as_deref(),
            Some("backend returned empty text")
        );
    }

    #[tokio::test]
    async fn long_backend_output_is_truncated() {
        let generator = generator(StubReply::Text("word ".repeat(400)));
        let (start, end) = window();
        let narrative = generator.narrate(&test_event(), &[], start, end).await;

        assert!(narrative.text.unwrap().chars().count() <= 900);
    }

    #[test]
    fn fallback_mentions_sentiment_news_and_fx() {
        let generator = generator(StubReply::Fail("unused".to_string()));
        let factors = vec![
            factor(
                "News activity",
                55,
                serde_json::json!({
                    "articlesCount": 110,
                    "sampleHeadlines": ["Spot ETF inflows surge", "Analysts see liquidations"]
                }),
            ),
            factor(
                "Market sentiment (Fear & Greed)",
                40,
                serde_json::json!({"value": 22, "classification": "Extreme Fear"}),
            ),
            factor(
                "FX context (EUR/USD)",
                20,
                serde_json::json!({"eurUsdRate": "1.0840", "dayChangePct": "0.1200"}),
            ),
        ];

        let text = generator.fallback_narrative(&test_event(), &factors);
        assert!(text.contains("Fear & Greed index was in the 'Extreme Fear' range (value 22)"));
        assert!(text.contains("institutional and analyst commentary"));
        assert!(text.contains("ETF flows and broader market participation"));
        assert!(text.contains("derivatives and liquidation dynamics"));
        assert!(text.contains("EUR/USD also moved 0.1200%"));
        assert!(text.ends_with("rather than advice."));
    }

    #[test]
    fn fallback_without_headlines_mentions_positioning() {
        let generator = generator(StubReply::Fail("unused".to_string()));
        let text = generator.fallback_narrative(&test_event(), &[]);
        assert!(text.contains("short-term positioning and technical trading"));
        assert!(text.contains("Overall confidence is LOW"));
    }

    #[test]
    fn themes_join_as_natural_language_list() {
        let headlines: Vec<String> = vec![
            "Spot ETF inflows surge".to_string(),
            "Massive liquidations hit derivatives".to_string(),
            "Analysts weigh in on reserve strategy".to_string(),
        ];
        let themes = infer_themes(&headlines);
        assert_eq!(
            themes,
            "institutional and analyst commentary, derivatives and liquidation dynamics, and ETF flows and broader market participation"
        );
    }

    #[test]
    fn unmatched_headlines_fall_back_to_generic_theme() {
        let headlines = vec!["Quiet day in markets".to_string()];
        assert_eq!(infer_themes(&headlines), "general crypto market developments");
    }
}
