//! OpenWeatherMap client for current conditions.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::WeatherConfig;

use super::{Conditions, WeatherProvider};

/// Weather lookup against the OpenWeatherMap current-weather endpoint.
pub struct OpenWeather {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    weather: Vec<WeatherEntry>,
    main: WeatherMain,
}

#[derive(Debug, Deserialize)]
struct WeatherEntry {
    main: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct WeatherMain {
    temp: f64,
    humidity: i64,
}

impl OpenWeather {
    pub fn new(config: &WeatherConfig, timeout: Duration) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("WEATHER_API_KEY is not configured")?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build weather HTTP client")?;

        Ok(Self {
            client,
            api_key,
            api_url: config.api_url.clone(),
        })
    }
}

#[async_trait]
impl WeatherProvider for OpenWeather {
    async fn current(&self, location: &str) -> Result<Conditions> {
        let url = format!("{}/weather", self.api_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", location),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
            ])
            .send()
            .await
            .with_context(|| format!("Weather request failed for {}", location))?
            .error_for_status()
            .with_context(|| format!("Weather service rejected lookup for {}", location))?;

        let data: WeatherResponse = response
            .json()
            .await
            .context("Failed to parse weather response")?;

        let entry = data
            .weather
            .first()
            .context("Weather response has no conditions")?;

        Ok(Conditions {
            location: location.to_string(),
            temperature_c: data.main.temp,
            condition: entry.main.clone(),
            description: entry.description.clone(),
            humidity: data.main.humidity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let json = r#"{
            "weather": [{"main": "Rain", "description": "light rain"}],
            "main": {"temp": 27.4, "humidity": 88}
        }"#;

        let parsed: WeatherResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.weather[0].main, "Rain");
        assert_eq!(parsed.main.humidity, 88);
    }

    #[test]
    fn test_missing_api_key_is_an_error() {
        let config = WeatherConfig {
            api_key: None,
            api_url: "https://api.openweathermap.org/data/2.5".to_string(),
            default_location: "Mumbai".to_string(),
        };

        assert!(OpenWeather::new(&config, Duration::from_secs(5)).is_err());
    }
}
