//! Core library for the `yaweather` city list.
//!
//! This crate defines:
//! - The weather snapshot model and provider condition codes
//! - Geocoding of city names to coordinates
//! - The forecast provider client
//! - A persisted store of tracked cities
//! - `CityList`, which ties the above together with bounded concurrency
//!
//! It is used by `yaweather-cli`, but carries no presentation logic and can be
//! embedded in any front-end.

pub mod cities;
pub mod config;
pub mod error;
pub mod geocode;
pub mod model;
pub mod provider;
pub mod store;

pub use cities::{AddedCity, CityList, CityListOptions, RefreshSummary};
pub use config::Config;
pub use error::{AddCityError, ApiError, CityError, GeocodeError, StoreError};
pub use geocode::{CoordinateResolver, NominatimResolver};
pub use model::{
    CityCoordinate, ConditionKind, Coordinate, Day, DayForecast, HourReading, WeatherSnapshot,
    normalize_city,
};
pub use provider::{WeatherProvider, provider_from_config};
pub use store::{JsonFileStore, LoadedCities, MemoryStore, QuarantinedRecord, Store, StoredCities};
