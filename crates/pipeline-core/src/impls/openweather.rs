//! OpenWeatherClient - `WeatherSource` の reqwest 実装
//!
//! `GET /data/2.5/weather?q=<city>&appid=<key>&units=metric` を呼びます。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::StageEnv;
use crate::ports::{SourceError, WeatherReading, WeatherSource};

pub const API_KEY_ENV: &str = "API_KEY";
const DEFAULT_BASE_URL: &str = "http://api.openweathermap.org/data/2.5/weather";

pub struct OpenWeatherClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    main: ApiMain,
    weather: Vec<ApiCondition>,
    wind: ApiWind,
    #[serde(default)]
    visibility: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiMain {
    temp: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct ApiCondition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct ApiWind {
    speed: f64,
}

impl OpenWeatherClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    /// Build from a function environment carrying `API_KEY`.
    pub fn from_env(env: &StageEnv) -> Result<Self, SourceError> {
        let key = env
            .get(API_KEY_ENV)
            .ok_or_else(|| SourceError::Transport(format!("{API_KEY_ENV} is not set")))?;
        Self::new(key)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn current(&self, city: &str) -> Result<WeatherReading, SourceError> {
        let response = self
            .http
            .get(&self.base_url)
            .query(&[("q", city), ("appid", self.api_key.as_str()), ("units", "metric")])
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                city: city.to_string(),
                status: status.as_u16(),
            });
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        reading_from(city, body)
    }
}

fn reading_from(city: &str, body: ApiResponse) -> Result<WeatherReading, SourceError> {
    let description = body
        .weather
        .into_iter()
        .next()
        .map(|c| c.description)
        .ok_or_else(|| SourceError::Decode("empty weather array".to_string()))?;

    Ok(WeatherReading {
        city: city.to_string(),
        temperature_c: body.main.temp,
        description,
        humidity_pct: body.main.humidity,
        wind_speed_ms: body.wind.speed,
        visibility_m: body.visibility,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_api_payload() {
        let json = r#"{
            "main": {"temp": 21.5, "humidity": 40},
            "weather": [{"description": "scattered clouds"}],
            "wind": {"speed": 3.1},
            "visibility": 10000
        }"#;
        let body: ApiResponse = serde_json::from_str(json).unwrap();
        let reading = reading_from("Tokyo", body).unwrap();

        assert_eq!(reading.city, "Tokyo");
        assert_eq!(reading.temperature_c, 21.5);
        assert_eq!(reading.description, "scattered clouds");
        assert_eq!(reading.visibility_m, Some(10000.0));
    }

    #[test]
    fn missing_visibility_is_none() {
        let json = r#"{
            "main": {"temp": 1.0, "humidity": 90},
            "weather": [{"description": "mist"}],
            "wind": {"speed": 0.5}
        }"#;
        let body: ApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(reading_from("London", body).unwrap().visibility_m, None);
    }

    #[test]
    fn empty_weather_array_is_a_decode_error() {
        let json = r#"{"main": {"temp": 1.0, "humidity": 90}, "weather": [], "wind": {"speed": 0.5}}"#;
        let body: ApiResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(reading_from("London", body), Err(SourceError::Decode(_))));
    }

    #[test]
    fn from_env_requires_api_key() {
        assert!(OpenWeatherClient::from_env(&StageEnv::new()).is_err());
        assert!(OpenWeatherClient::from_env(&StageEnv::new().with(API_KEY_ENV, "k")).is_ok());
    }
}
