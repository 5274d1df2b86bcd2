use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use move_explainer::cache::EventCache;
use move_explainer::config::AppConfig;
use move_explainer::detect::EventDetector;
use move_explainer::explain::{narrative::NarrativeGenerator, Explainer};
use move_explainer::handlers::{self, AppState};
use move_explainer::ingest::{FxIngest, NewsIngest, PriceIngest, SentimentIngest, WeatherIngest};
use move_explainer::jobs::DailyRefreshJob;
use move_explainer::store::{postgres, Stores};
use move_explainer::{
    CoinGeckoClient, FearGreedClient, FrankfurterClient, GdeltClient, OpenAiClient,
    OpenMeteoClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting move-explainer...");

    let config = Arc::new(AppConfig::from_env()?);

    let pool = postgres::init_pool(&config.database_url).await?;
    sqlx::migrate!().run(&pool).await?;
    info!("Database ready");

    let stores = Stores::postgres(pool);

    // Upstream clients
    let price_feed = Arc::new(CoinGeckoClient::new(config.coingecko_id.clone(), None));
    let news_feed = Arc::new(GdeltClient::new());
    let fx_feed = Arc::new(FrankfurterClient::new());
    let sentiment_feed = Arc::new(FearGreedClient::new());
    let weather_feed = Arc::new(OpenMeteoClient::new());
    let narrative_backend = Arc::new(OpenAiClient::new(&config));

    // Pipeline components
    let price_ingest = Arc::new(PriceIngest::new(
        price_feed,
        stores.candles.clone(),
        config.clone(),
    ));
    let news_ingest = Arc::new(NewsIngest::new(news_feed.clone(), stores.news.clone()));
    let fx_ingest = Arc::new(FxIngest::new(fx_feed, stores.fx.clone()));
    let sentiment_ingest = Arc::new(SentimentIngest::new(
        sentiment_feed,
        stores.sentiment.clone(),
    ));
    let weather_ingest = Arc::new(WeatherIngest::new(weather_feed, stores.weather.clone()));

    let detector = Arc::new(EventDetector::new(stores.clone(), config.clone()));
    let narrative = Arc::new(NarrativeGenerator::new(narrative_backend, config.clone()));
    let explainer = Arc::new(Explainer::new(
        stores.clone(),
        news_ingest.clone(),
        fx_ingest.clone(),
        news_feed,
        narrative,
        config.clone(),
    ));

    let cache = Arc::new(EventCache::new(config.cache_ttl_secs));

    let job = Arc::new(DailyRefreshJob::new(
        price_ingest,
        detector,
        news_ingest,
        sentiment_ingest,
        fx_ingest,
        weather_ingest,
        explainer.clone(),
        stores.clone(),
        cache.clone(),
        config.clone(),
    ));

    if config.jobs_enabled {
        DailyRefreshJob::spawn(job.clone());
        info!("Daily refresh scheduler started");
    }

    let state = Arc::new(AppState {
        stores,
        explainer,
        job,
        cache,
        config: config.clone(),
    });

    let app = Router::new()
        .route("/api/events", get(handlers::get_events))
        .route("/api/explain/{event_id}", get(handlers::get_explanation))
        .route("/api/chart", get(handlers::get_chart))
        .route("/api/admin/refresh", post(handlers::admin_refresh))
        .route("/health", get(handlers::health_check))
        .layer(CorsLayer::new().allow_origin(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("move-explainer listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
