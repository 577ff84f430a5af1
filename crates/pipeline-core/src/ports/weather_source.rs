//! WeatherSource port - extract ステージが読む外部 API

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("weather API returned status {status} for {city}")]
    Status { city: String, status: u16 },

    #[error("weather API request failed: {0}")]
    Transport(String),

    #[error("weather API response could not be decoded: {0}")]
    Decode(String),
}

/// Current conditions for one city (metric units).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    pub city: String,
    pub temperature_c: f64,
    pub description: String,
    pub humidity_pct: f64,
    pub wind_speed_ms: f64,
    pub visibility_m: Option<f64>,
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn current(&self, city: &str) -> Result<WeatherReading, SourceError>;
}
