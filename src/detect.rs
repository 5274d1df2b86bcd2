//! Move-event detection over the daily candle series.
//!
//! Idempotent and monotonic on history: once a date leaves the mutable
//! window its event is frozen, so re-running detection over revised upstream
//! data never changes old analytics.

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::store::Stores;
use crate::types::{Direction, MoveEvent, NewMoveEvent, Result};

pub struct EventDetector {
    stores: Stores,
    config: Arc<AppConfig>,
}

impl EventDetector {
    pub fn new(stores: Stores, config: Arc<AppConfig>) -> Self {
        Self { stores, config }
    }

    /// Detect qualifying moves over the configured lookback window.
    /// Returns the number of newly inserted events; updates to events inside
    /// the mutable window are not counted.
    pub async fn detect(&self) -> Result<u32> {
        self.detect_as_of(Utc::now().date_naive()).await
    }

    pub async fn detect_as_of(&self, today: NaiveDate) -> Result<u32> {
        let asset = self.config.asset_symbol.as_str();
        let thresholds = self.config.thresholds();
        let Some(min_threshold) = thresholds.last().copied() else {
            return Ok(0);
        };

        let start = today - Duration::days(self.config.lookback_days.max(1) as i64);
        let candles = self.stores.candles.find_from(asset, start).await?;

        let mut existing_by_date: HashMap<NaiveDate, MoveEvent> = self
            .stores
            .events
            .find_from(asset, start)
            .await?
            .into_iter()
            .map(|e| (e.event_date, e))
            .collect();

        let mutable_from = today - Duration::days(self.config.mutable_days as i64);

        let mut created: u32 = 0;
        let mut updated: u32 = 0;

        for candle in candles {
            // Guard against corrupt upstream data.
            if candle.open <= Decimal::ZERO {
                continue;
            }

            let pct = ((candle.close - candle.open) / candle.open * Decimal::from(100))
                .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);

            let abs_pct = pct.abs();
            if abs_pct < min_threshold {
                continue;
            }
            let Some((threshold, severity)) = match_threshold(abs_pct, &thresholds) else {
                continue;
            };

            let date = candle.candle_date;
            let already_exists = existing_by_date.contains_key(&date);
            let is_mutable = date >= mutable_from;

            // Frozen history: never overwrite an event outside the mutable
            // window, even when the recomputed pct/severity differ.
            if already_exists && !is_mutable {
                continue;
            }

            let event = NewMoveEvent {
                asset: asset.to_string(),
                event_date: date,
                direction: if pct >= Decimal::ZERO {
                    Direction::Up
                } else {
                    Direction::Down
                },
                pct_change: pct,
                threshold_used: format!("abs(daily_return_pct) >= {threshold}"),
                severity,
            };

            let saved = self.stores.events.upsert(&event).await?;

            if already_exists {
                updated += 1;
            } else {
                created += 1;
                existing_by_date.insert(date, saved);
            }
        }

        if updated > 0 {
            debug!("Detection refreshed {updated} mutable-window events");
        }
        info!("Detection for {asset}: {created} new events");
        Ok(created)
    }
}

/// Find the largest threshold the absolute move clears. Thresholds are sorted
/// descending, so the first match wins; severity is the threshold's floor.
fn match_threshold(abs_pct: Decimal, thresholds_desc: &[Decimal]) -> Option<(Decimal, i16)> {
    for &t in thresholds_desc {
        if abs_pct >= t {
            let severity = t.floor().to_i64().unwrap_or(0) as i16;
            return Some((t, severity));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DailyCandle;

    fn test_config(thresholds: &str, mutable_days: u32) -> Arc<AppConfig> {
        Arc::new(AppConfig {
            asset_symbol: "BTC".to_string(),
            asset_name: "Bitcoin".to_string(),
            coingecko_id: "bitcoin".to_string(),
            thresholds_csv: thresholds.to_string(),
            lookback_days: 180,
            mutable_days,
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

    fn candle(date: NaiveDate, open: i64, close: i64) -> DailyCandle {
        DailyCandle {
            asset: "BTC".to_string(),
            candle_date: date,
            open: Decimal::from(open),
            high: Decimal::from(open.max(close)),
            low: Decimal::from(open.min(close)),
            close: Decimal::from(close),
            volume: None,
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn four_percent_move_matches_top_threshold() {
        let stores = Stores::in_memory();
        let today = date("2025-06-10");
        stores
            .candles
            .upsert(&candle(date("2025-06-05"), 100, 104))
            .await
            .unwrap();

        let detector = EventDetector::new(stores.clone(), test_config("4,3,2", 2));
        let created = detector.detect_as_of(today).await.unwrap();
        assert_eq!(created, 1);

        let event = stores
            .events
            .find_from("BTC", date("2025-06-01"))
            .await
            .unwrap()
            .remove(0);
        assert_eq!(event.pct_change, "4.0000".parse::<Decimal>().unwrap());
        assert_eq!(event.severity, 4);
        assert_eq!(event.direction, Direction::Up);
        assert_eq!(event.threshold_used, "abs(daily_return_pct) >= 4");
    }

    #[tokio::test]
    async fn intermediate_move_matches_largest_cleared_threshold() {
        // abs(pct) = 2.5 with thresholds {4,3,2} matches 2.
        let stores = Stores::in_memory();
        let today = date("2025-06-10");
        stores
            .candles
            .upsert(&candle(date("2025-06-05"), 1000, 975))
            .await
            .unwrap();

        let detector = EventDetector::new(stores.clone(), test_config("4,3,2", 2));
        detector.detect_as_of(today).await.unwrap();

        let event = stores
            .events
            .find_from("BTC", date("2025-06-01"))
            .await
            .unwrap()
            .remove(0);
        assert_eq!(event.pct_change, "-2.5000".parse::<Decimal>().unwrap());
        assert_eq!(event.severity, 2);
        assert_eq!(event.direction, Direction::Down);
    }

    #[tokio::test]
    async fn sub_threshold_and_zero_open_candles_are_skipped() {
        let stores = Stores::in_memory();
        let today = date("2025-06-10");
        stores
            .candles
            .upsert(&candle(date("2025-06-04"), 100, 101))
            .await
            .unwrap();
        stores
            .candles
            .upsert(&candle(date("2025-06-05"), 0, 104))
            .await
            .unwrap();

        let detector = EventDetector::new(stores.clone(), test_config("4,3,2", 2));
        let created = detector.detect_as_of(today).await.unwrap();
        assert_eq!(created, 0);
        assert!(stores
            .events
            .find_from("BTC", date("2025-06-01"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn frozen_event_is_not_overwritten_by_revised_data() {
        let stores = Stores::in_memory();
        let detector = EventDetector::new(stores.clone(), test_config("4,3,2", 2));

        let event_date = date("2025-06-01");
        stores
            .candles
            .upsert(&candle(event_date, 100, 104))
            .await
            .unwrap();
        detector.detect_as_of(date("2025-06-02")).await.unwrap();

        // Upstream revises the candle; the date is now outside mutable_days=2.
        stores
            .candles
            .upsert(&candle(event_date, 100, 108))
            .await
            .unwrap();
        let created = detector.detect_as_of(date("2025-06-10")).await.unwrap();
        assert_eq!(created, 0);

        let event = stores
            .events
            .find_from("BTC", event_date)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(event.pct_change, "4.0000".parse::<Decimal>().unwrap());
    }

    #[tokio::test]
    async fn mutable_event_is_recomputed_and_not_counted_as_created() {
        let stores = Stores::in_memory();
        let detector = EventDetector::new(stores.clone(), test_config("4,3,2", 2));

        let event_date = date("2025-06-09");
        stores
            .candles
            .upsert(&candle(event_date, 100, 104))
            .await
            .unwrap();
        let first = detector.detect_as_of(date("2025-06-10")).await.unwrap();
        assert_eq!(first, 1);

        stores
            .candles
            .upsert(&candle(event_date, 100, 97))
            .await
            .unwrap();
        let second = detector.detect_as_of(date("2025-06-10")).await.unwrap();
        // The event changed but the return value only counts inserts.
        assert_eq!(second, 0);

        let event = stores
            .events
            .find_from("BTC", event_date)
            .await
            .unwrap()
            .remove(0);
        assert_eq!(event.direction, Direction::Down);
        assert_eq!(event.severity, 3);
    }

    #[tokio::test]
    async fn empty_threshold_set_is_a_noop() {
        let stores = Stores::in_memory();
        stores
            .candles
            .upsert(&candle(date("2025-06-05"), 100, 120))
            .await
            .unwrap();

        // Entries that fail to parse are dropped, leaving an empty set.
        let detector = EventDetector::new(stores.clone(), test_config("abc", 2));
        let created = detector.detect_as_of(date("2025-06-10")).await.unwrap();
        assert_eq!(created, 0);
    }

    #[test]
    fn rounding_is_half_up_at_four_decimals() {
        // Raw return is 0.41155%, an exact midpoint at 4 decimals.
        let open = Decimal::from(10_000);
        let close = "10041.155".parse::<Decimal>().unwrap();
        let pct = ((close - open) / open * Decimal::from(100))
            .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);
        assert_eq!(pct, "0.4116".parse::<Decimal>().unwrap());
    }

    #[test]
    fn fractional_threshold_floors_to_severity() {
        let thresholds = vec!["2.5".parse::<Decimal>().unwrap()];
        let matched = match_threshold("3.1".parse().unwrap(), &thresholds).unwrap();
        assert_eq!(matched.1, 2);
    }
}
