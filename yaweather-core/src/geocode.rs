//! Forward geocoding: free-text city name to coordinates.
//! Uses Nominatim (OpenStreetMap) place search - no API key required.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::{fmt::Debug, time::Duration};
use tracing::debug;

use crate::{Coordinate, GeocodeError, config::GeocoderConfig};

#[async_trait]
pub trait CoordinateResolver: Send + Sync + Debug {
    /// Look up `city` and return the centre of the best match.
    ///
    /// The match is taken as-is; nothing checks it is the city the user meant.
    async fn resolve(&self, city: &str) -> Result<Coordinate, GeocodeError>;
}

#[derive(Debug, Clone)]
pub struct NominatimResolver {
    base_url: String,
    language: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    /// `[south, north, west, east]`
    #[serde(default)]
    boundingbox: Option<Vec<String>>,
    #[serde(default)]
    display_name: Option<String>,
}

impl NominatimPlace {
    fn bounding_center(&self) -> Option<Coordinate> {
        let bbox = self.boundingbox.as_ref()?;
        let [south, north, west, east] = bbox.as_slice() else {
            return None;
        };
        let edge = |s: &String| s.parse::<f64>().ok();
        Some(Coordinate::new(
            (edge(south)? + edge(north)?) / 2.0,
            (edge(west)? + edge(east)?) / 2.0,
        ))
    }

    fn center(&self) -> Result<Coordinate, GeocodeError> {
        if let Some(center) = self.bounding_center() {
            return Ok(center);
        }

        let lat = self.lat.parse::<f64>();
        let lon = self.lon.parse::<f64>();
        match (lat, lon) {
            (Ok(lat), Ok(lon)) => Ok(Coordinate::new(lat, lon)),
            _ => Err(GeocodeError::InvalidResponse(format!(
                "unparsable coordinates '{}', '{}'",
                self.lat, self.lon
            ))),
        }
    }
}

impl NominatimResolver {
    pub fn new(config: &GeocoderConfig) -> Result<Self, GeocodeError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| GeocodeError::Provider(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: config.language.clone(),
            http,
        })
    }
}

#[async_trait]
impl CoordinateResolver for NominatimResolver {
    async fn resolve(&self, city: &str) -> Result<Coordinate, GeocodeError> {
        let query = city.trim();
        debug!(city = query, "geocoding");

        let res = self
            .http
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", query),
                ("format", "json"),
                ("limit", "1"),
                ("accept-language", self.language.as_str()),
            ])
            .send()
            .await
            .map_err(GeocodeError::Network)?;

        let status = res.status();
        if !status.is_success() {
            return Err(GeocodeError::Provider(format!("status {status}")));
        }

        let places: Vec<NominatimPlace> = res
            .json()
            .await
            .map_err(|e| GeocodeError::InvalidResponse(e.to_string()))?;

        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::NotFound(query.to_string()))?;

        let center = place.center()?;
        debug!(
            city = query,
            place = place.display_name.as_deref().unwrap_or(""),
            %center,
            "geocoded"
        );
        Ok(center)
    }
}
