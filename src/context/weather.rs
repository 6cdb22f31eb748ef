//! Open-Meteo weather lookup.
//!
//! [`WeatherClient`] resolves a city name to coordinates with the Open-Meteo
//! geocoding API and fetches the current conditions for those coordinates.
//! Neither endpoint needs an API key.  The result is a plain [`Weather`]
//! value the caller hands to `SharedState::set_weather_value`; the
//! orchestrator never performs lookups itself.

use serde::Deserialize;
use thiserror::Error;

use crate::config::WeatherConfig;
use crate::context::{Weather, WeatherCondition};

const GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

// ---------------------------------------------------------------------------
// WeatherError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather lookups are disabled in settings")]
    Disabled,

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("weather request timed out")]
    Timeout,

    #[error("no location found for {0:?}")]
    UnknownCity(String),

    #[error("failed to parse weather response: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for WeatherError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            WeatherError::Timeout
        } else if e.is_decode() {
            WeatherError::Parse(e.to_string())
        } else {
            WeatherError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodingResult {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentConditions,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    temperature_2m: f32,
    #[serde(default)]
    weather_code: u32,
}

impl CurrentConditions {
    fn into_weather(self) -> Weather {
        let condition = WeatherCondition::from_wmo_code(self.weather_code);
        Weather {
            condition,
            description: condition.describe().to_string(),
            temperature_c: Some(self.temperature_2m),
        }
    }
}

// ---------------------------------------------------------------------------
// WeatherClient
// ---------------------------------------------------------------------------

/// Thin async client for the Open-Meteo geocoding and forecast endpoints.
pub struct WeatherClient {
    client: reqwest::Client,
    enabled: bool,
}

impl WeatherClient {
    /// Build a client whose requests time out after `config.timeout_secs`.
    pub fn from_config(config: &WeatherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            enabled: config.enabled,
        }
    }

    /// Resolve `city` to `(latitude, longitude)`.
    pub async fn geocode(&self, city: &str) -> Result<(f64, f64), WeatherError> {
        if !self.enabled {
            return Err(WeatherError::Disabled);
        }
        let response: GeocodingResponse = self
            .client
            .get(GEOCODING_URL)
            .query(&[("name", city), ("count", "1")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .results
            .first()
            .map(|r| (r.latitude, r.longitude))
            .ok_or_else(|| WeatherError::UnknownCity(city.to_string()))
    }

    /// Current weather at the given coordinates.
    pub async fn current(&self, latitude: f64, longitude: f64) -> Result<Weather, WeatherError> {
        if !self.enabled {
            return Err(WeatherError::Disabled);
        }
        let response: ForecastResponse = self
            .client
            .get(FORECAST_URL)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", "temperature_2m,weather_code".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.current.into_weather())
    }

    /// Geocode `city` and fetch its current weather.
    pub async fn for_city(&self, city: &str) -> Result<Weather, WeatherError> {
        let (lat, lon) = self.geocode(city).await?;
        let weather = self.current(lat, lon).await?;
        log::info!(
            "weather: {city} ({lat:.4}, {lon:.4}) → {:?}, {:.1}°C",
            weather.condition,
            weather.temperature_c.unwrap_or_default()
        );
        Ok(weather)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
