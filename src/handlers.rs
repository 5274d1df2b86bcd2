use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::EventCache;
use crate::config::AppConfig;
use crate::explain::Explainer;
use crate::jobs::DailyRefreshJob;
use crate::store::Stores;
use crate::types::{ExplainError, Factor, MoveEvent};

const MAX_EVENTS_LIMIT: u32 = 200;

/// Application state shared across handlers
pub struct AppState {
    pub stores: Stores,
    pub explainer: Arc<Explainer>,
    pub job: Arc<DailyRefreshJob>,
    pub cache: Arc<EventCache>,
    pub config: Arc<AppConfig>,
}

#[derive(Debug, serde::Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_events_limit")]
    limit: u32,
}

fn default_events_limit() -> u32 {
    100
}

/// GET /api/events - Latest detected move events, newest first
pub async fn get_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<EventResponse>>, (StatusCode, String)> {
    let limit = query.limit.min(MAX_EVENTS_LIMIT);

    let events = match state.cache.latest_events(limit).await {
        Some(cached) => cached,
        None => {
            let fetched = state
                .stores
                .events
                .find_latest(&state.config.asset_symbol, limit)
                .await
                .map_err(internal_error)?;
            state.cache.put_latest_events(limit, fetched.clone()).await;
            fetched
        }
    };

    Ok(Json(events.into_iter().map(EventResponse::from).collect()))
}

/// GET /api/explain/{event_id} - Read-or-generate the explanation for an event
pub async fn get_explanation(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<i64>,
) -> Result<Json<ExplanationResponse>, (StatusCode, String)> {
    let event = state
        .stores
        .events
        .find_by_id(event_id)
        .await
        .map_err(internal_error)?
        .ok_or((StatusCode::NOT_FOUND, format!("event {event_id} not found")))?;

    let explanation = match state.cache.explanation(event_id).await {
        Some(cached) => cached,
        None => {
            let generated = state
                .explainer
                .explain(event_id)
                .await
                .map_err(explain_error)?;
            state.cache.put_explanation(generated.clone()).await;
            generated
        }
    };

    let pct = event.pct_display().to_string();

    Ok(Json(ExplanationResponse {
        event_id,
        event_date: event.event_date,
        direction: event.direction.as_str().to_string(),
        pct_change: pct,
        confidence: explanation.confidence.as_str().to_string(),
        summary: explanation.summary_text,
        narrative_text: explanation.narrative.text,
        narrative_source: explanation.narrative.source.as_str().to_string(),
        narrative_model: explanation.narrative.model,
        factors: explanation.factors,
    }))
}

#[derive(Debug, serde::Deserialize)]
pub struct ChartQuery {
    #[serde(default = "default_chart_days")]
    days: u32,
}

fn default_chart_days() -> u32 {
    180
}

/// GET /api/chart - Daily OHLC points for the price chart
pub async fn get_chart(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChartQuery>,
) -> Result<Json<Vec<ChartPoint>>, (StatusCode, String)> {
    let start = chrono::Utc::now().date_naive() - chrono::Duration::days(query.days as i64);
    let candles = state
        .stores
        .candles
        .find_from(&state.config.asset_symbol, start)
        .await
        .map_err(internal_error)?;

    Ok(Json(
        candles
            .into_iter()
            .map(|c| ChartPoint {
                date: c.candle_date,
                open: c.open,
                high: c.high,
                low: c.low,
                close: c.close,
            })
            .collect(),
    ))
}

/// POST /api/admin/refresh - Token-guarded trigger of the daily refresh job
pub async fn admin_refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let token = headers
        .get("X-Admin-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if state.config.admin_token.is_empty() || token != state.config.admin_token {
        warn!("Rejected admin refresh with invalid token");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "unauthorized"})),
        ));
    }

    info!("Admin-triggered refresh");
    state.job.run().await;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

/// GET /health - Service liveness
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

fn internal_error(e: ExplainError) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn explain_error(e: ExplainError) -> (StatusCode, String) {
    match e {
        ExplainError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not found")),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

// Response types
#[derive(Debug, serde::Serialize)]
pub struct EventResponse {
    pub id: i64,
    pub date: chrono::NaiveDate,
    pub direction: String,
    pub pct_change: rust_decimal::Decimal,
    pub severity: i16,
    pub threshold_used: String,
}

impl From<MoveEvent> for EventResponse {
    fn from(e: MoveEvent) -> Self {
        Self {
            id: e.id,
            date: e.event_date,
            direction: e.direction.as_str().to_string(),
            pct_change: e.pct_change,
            severity: e.severity,
            threshold_used: e.threshold_used,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ExplanationResponse {
    pub event_id: i64,
    pub event_date: chrono::NaiveDate,
    pub direction: String,
    pub pct_change: String,
    pub confidence: String,
    pub summary: String,
    pub narrative_text: Option<String>,
    pub narrative_source: String,
    pub narrative_model: Option<String>,
    pub factors: Vec<Factor>,
}

#[derive(Debug, serde::Serialize)]
pub struct ChartPoint {
    pub date: chrono::NaiveDate,
    pub open: rust_decimal::Decimal,
    pub high: rust_decimal::Decimal,
    pub low: rust_decimal::Decimal,
    pub close: rust_decimal::Decimal,
}
