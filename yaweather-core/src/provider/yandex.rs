use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::{
    ApiError, ConditionKind, Coordinate, DayForecast, WeatherSnapshot, config::WeatherConfig,
};

use super::WeatherProvider;

const API_KEY_HEADER: &str = "X-Yandex-API-Key";

#[derive(Debug, Clone)]
pub struct YandexWeatherProvider {
    api_key: String,
    base_url: String,
    lang: String,
    limit: u8,
    http: Client,
}

impl YandexWeatherProvider {
    pub fn new(api_key: String, config: &WeatherConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ApiError::NetworkFailure)?;

        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            lang: config.lang.clone(),
            limit: config.limit,
            http,
        })
    }

    fn forecast_url(&self) -> String {
        format!("{}/v2/forecast", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct YaInfo {
    url: String,
}

#[derive(Debug, Deserialize)]
struct YaFact {
    temp: f64,
    icon: String,
    condition: String,
    wind_speed: f64,
    pressure_mm: i32,
}

#[derive(Debug, Deserialize)]
struct YaForecastResponse {
    info: YaInfo,
    fact: YaFact,
    #[serde(default)]
    forecasts: Vec<DayForecast>,
}

impl From<YaForecastResponse> for WeatherSnapshot {
    fn from(parsed: YaForecastResponse) -> Self {
        WeatherSnapshot {
            name: String::new(),
            temperature: parsed.fact.temp,
            condition_code: parsed.fact.icon,
            condition: ConditionKind::from_provider(&parsed.fact.condition),
            url: parsed.info.url,
            pressure: parsed.fact.pressure_mm,
            wind_speed: parsed.fact.wind_speed,
            forecasts: parsed.forecasts,
        }
    }
}

/// Decode a forecast response body.
pub fn parse_forecast(body: &[u8]) -> Result<WeatherSnapshot, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::InvalidData);
    }

    let parsed: YaForecastResponse =
        serde_json::from_slice(body).map_err(|e| ApiError::InvalidModel(e.to_string()))?;

    Ok(parsed.into())
}

#[async_trait]
impl WeatherProvider for YandexWeatherProvider {
    async fn fetch_weather(&self, at: Coordinate) -> Result<WeatherSnapshot, ApiError> {
        debug!(%at, "requesting forecast");

        let res = self
            .http
            .get(self.forecast_url())
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[
                ("lat", at.latitude.to_string()),
                ("lon", at.longitude.to_string()),
                ("lang", self.lang.clone()),
                ("limit", self.limit.to_string()),
                ("hours", "true".to_string()),
                ("extra", "false".to_string()),
            ])
            .send()
            .await
            .map_err(ApiError::NetworkFailure)?;

        let status = res.status();
        let body = res.bytes().await.map_err(|e| {
            debug!(error = %e, "failed to read forecast body");
            ApiError::InvalidData
        })?;

        if !status.is_success() {
            // The server answered, so this is not a connectivity problem.
            return Err(ApiError::InvalidModel(format!(
                "status {}: {}",
                status.as_u16(),
                truncate_body(&String::from_utf8_lossy(&body))
            )));
        }

        parse_forecast(&body)
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HourReading;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE: &str = r#"{"info":{"url":"x"},"fact":{"temp":-3.4,"icon":"i1","condition":"snow","wind_speed":2.1,"pressure_mm":745},"forecasts":[{"date":"2021-02-10","hours":[{"hour":"00","temp":-4}]}]}"#;

    fn provider_for(server: &MockServer) -> YandexWeatherProvider {
        let config = WeatherConfig {
            base_url: server.uri(),
            ..WeatherConfig::default()
        };
        YandexWeatherProvider::new("KEY".to_string(), &config).expect("client builds")
    }

    #[test]
    fn parses_sample_forecast() {
        let w = parse_forecast(SAMPLE.as_bytes()).expect("sample decodes");

        assert_eq!(w.temperature, -3.4);
        assert_eq!(w.condition, ConditionKind::Snow);
        assert_eq!(w.condition_code, "i1");
        assert_eq!(w.url, "x");
        assert_eq!(w.pressure, 745);
        assert_eq!(w.wind_speed, 2.1);
        assert_eq!(
            w.forecasts,
            vec![DayForecast {
                date: Some("2021-02-10".into()),
                hours: vec![HourReading { hour: "00".into(), temp: -4 }],
            }]
        );
    }

    #[test]
    fn decoded_snapshot_survives_persistence_roundtrip() {
        let w = parse_forecast(SAMPLE.as_bytes()).unwrap().with_name("Москва");
        let json = serde_json::to_string(&w).unwrap();
        let back: WeatherSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn unknown_condition_is_not_a_decode_error() {
        let body = SAMPLE.replace("\"snow\"", "\"sandstorm\"");
        let w = parse_forecast(body.as_bytes()).expect("still decodes");
        assert_eq!(w.condition, ConditionKind::Unknown);
    }

    #[test]
    fn empty_body_is_invalid_data() {
        assert!(matches!(parse_forecast(b""), Err(ApiError::InvalidData)));
        assert!(matches!(parse_forecast(b"  \n"), Err(ApiError::InvalidData)));
    }

    #[test]
    fn missing_fact_is_invalid_model() {
        let body = r#"{"info":{"url":"x"},"forecasts":[]}"#;
        let err = parse_forecast(body.as_bytes()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidModel(ref m) if m.contains("fact")));
    }

    #[test]
    fn truncates_long_bodies_on_char_boundary() {
        let long = "ж".repeat(300);
        let cut = truncate_body(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 203);
    }

    #[tokio::test]
    async fn sends_expected_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/forecast"))
            .and(header(API_KEY_HEADER, "KEY"))
            .and(query_param("lat", "55.75"))
            .and(query_param("lon", "37.62"))
            .and(query_param("lang", "ru_RU"))
            .and(query_param("limit", "2"))
            .and(query_param("hours", "true"))
            .and(query_param("extra", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE))
            .expect(1)
            .mount(&server)
            .await;

        let w = provider_for(&server)
            .fetch_weather(Coordinate::new(55.75, 37.62))
            .await
            .expect("forecast");
        assert_eq!(w.condition, ConditionKind::Snow);
        assert!(w.name.is_empty());
    }

    #[tokio::test]
    async fn empty_response_is_invalid_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .fetch_weather(Coordinate::new(0.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidData));
    }

    #[tokio::test]
    async fn error_status_is_not_a_network_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .fetch_weather(Coordinate::new(0.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidModel(ref m) if m == "status 403: forbidden"));
        assert!(!err.is_network_failure());
    }

    #[tokio::test]
    async fn unreachable_host_is_network_failure() {
        let config = WeatherConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..WeatherConfig::default()
        };
        let provider = YandexWeatherProvider::new("KEY".into(), &config).unwrap();

        let err = provider.fetch_weather(Coordinate::new(0.0, 0.0)).await.unwrap_err();
        assert!(matches!(err, ApiError::NetworkFailure(_)));
    }
}
