use crate::{ApiError, Config, Coordinate, WeatherSnapshot, provider::yandex::YandexWeatherProvider};
use async_trait::async_trait;
use std::fmt::Debug;

pub mod yandex;

#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    /// Fetch current conditions and the hourly forecast at `at`.
    ///
    /// The returned snapshot has an empty `name`; callers attach the city.
    async fn fetch_weather(&self, at: Coordinate) -> Result<WeatherSnapshot, ApiError>;
}

/// Construct the forecast provider from config.
pub fn provider_from_config(config: &Config) -> anyhow::Result<Box<dyn WeatherProvider>> {
    let api_key = config.api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for the weather provider.\n\
             Hint: run `yaweather configure` or set {}.",
            crate::config::API_KEY_ENV
        )
    })?;

    let provider = YandexWeatherProvider::new(api_key, &config.weather)?;
    Ok(Box::new(provider))
}
