pub mod cache;
pub mod config;
pub mod detect;
pub mod explain;
pub mod handlers;
pub mod ingest;
pub mod jobs;
pub mod sources {
    pub mod coingecko;
    pub mod fear_greed;
    pub mod frankfurter;
    pub mod gdelt;
    pub mod open_meteo;
    pub mod openai;
}
pub mod store;
pub mod types;

pub use types::*;

pub use sources::coingecko::CoinGeckoClient;
pub use sources::fear_greed::FearGreedClient;
pub use sources::frankfurter::FrankfurterClient;
pub use sources::gdelt::GdeltClient;
pub use sources::open_meteo::OpenMeteoClient;
pub use sources::openai::OpenAiClient;
