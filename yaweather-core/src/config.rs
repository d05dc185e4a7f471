use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};

/// Environment variable that overrides the stored weather API key.
pub const API_KEY_ENV: &str = "YAWEATHER_API_KEY";

/// Cities tracked on first launch.
pub const DEFAULT_CITIES: &[&str] = &[
    "Москва",
    "Санкт-Петербург",
    "Иркутск",
    "Владивосток",
    "Новосибирск",
    "Сочи",
    "Пенза",
    "Томск",
    "Челябинск",
    "Тюмень",
];

/// Forecast provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub lang: String,
    /// Number of forecast days requested.
    pub limit: u8,
    pub timeout_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.weather.yandex.ru".to_string(),
            lang: "ru_RU".to_string(),
            limit: 2,
            timeout_secs: 10,
        }
    }
}

/// Place search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub base_url: String,
    pub user_agent: String,
    pub language: String,
    pub timeout_secs: u64,
    /// Minimum spacing between lookups. Nominatim's usage policy allows one
    /// request per second.
    pub min_interval_ms: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: concat!("yaweather/", env!("CARGO_PKG_VERSION")).to_string(),
            language: "ru".to_string(),
            timeout_secs: 10,
            min_interval_ms: 1000,
        }
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// max_concurrent_requests = 4
///
/// [weather]
/// api_key = "..."
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cities seeded into an empty store.
    pub default_cities: Vec<String>,

    /// Upper bound on forecast requests in flight during a refresh.
    pub max_concurrent_requests: usize,

    /// Overrides the platform data directory location of the city store.
    pub storage_path: Option<PathBuf>,

    pub weather: WeatherConfig,
    pub geocoder: GeocoderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_cities: DEFAULT_CITIES.iter().map(|c| c.to_string()).collect(),
            max_concurrent_requests: 4,
            storage_path: None,
            weather: WeatherConfig::default(),
            geocoder: GeocoderConfig::default(),
        }
    }
}

impl Config {
    /// Load config from disk, or return defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(contents)?;
        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(&path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("ru", "yaweather", "yaweather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Path to the persisted city list.
    pub fn storage_file_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage_path {
            return Ok(path.clone());
        }
        Ok(Self::project_dirs()?.data_dir().join("cities.json"))
    }

    pub fn set_api_key(&mut self, api_key: String) {
        self.weather.api_key = Some(api_key);
    }

    /// API key for the forecast provider; the environment wins over the file.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.weather.api_key.clone())
            .filter(|k| !k.trim().is_empty())
    }

    /// Concurrency limit, never zero.
    pub fn concurrency(&self) -> usize {
        self.max_concurrent_requests.max(1)
    }
}
