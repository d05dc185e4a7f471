use serde::{Deserialize, Serialize};

/// Base location of the provider's condition icons; `icon` codes are appended as `<code>.svg`.
const ICON_BASE_URL: &str = "https://yastatic.net/weather/i/icons/funky/dark";

/// Identity key for a city: trimmed and lower-cased.
pub fn normalize_city(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Case-insensitive city name comparison.
pub fn same_city(a: &str, b: &str) -> bool {
    normalize_city(a) == normalize_city(b)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Weather category as reported by the provider's `fact.condition` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConditionKind {
    Clear,
    PartlyCloudy,
    Cloudy,
    Overcast,
    Drizzle,
    LightRain,
    Rain,
    ModerateRain,
    HeavyRain,
    ContinuousHeavyRain,
    Showers,
    WetSnow,
    LightSnow,
    Snow,
    SnowShowers,
    Hail,
    Thunderstorm,
    ThunderstormWithRain,
    ThunderstormWithHail,
    /// Not yet fetched, or a code this client does not know.
    #[default]
    Unknown,
}

impl ConditionKind {
    pub const fn all() -> &'static [ConditionKind] {
        &[
            ConditionKind::Clear,
            ConditionKind::PartlyCloudy,
            ConditionKind::Cloudy,
            ConditionKind::Overcast,
            ConditionKind::Drizzle,
            ConditionKind::LightRain,
            ConditionKind::Rain,
            ConditionKind::ModerateRain,
            ConditionKind::HeavyRain,
            ConditionKind::ContinuousHeavyRain,
            ConditionKind::Showers,
            ConditionKind::WetSnow,
            ConditionKind::LightSnow,
            ConditionKind::Snow,
            ConditionKind::SnowShowers,
            ConditionKind::Hail,
            ConditionKind::Thunderstorm,
            ConditionKind::ThunderstormWithRain,
            ConditionKind::ThunderstormWithHail,
            ConditionKind::Unknown,
        ]
    }

    /// Map a provider condition string. Never fails: unrecognised codes become `Unknown`.
    pub fn from_provider(code: &str) -> Self {
        match code.trim() {
            "clear" => Self::Clear,
            "partly-cloudy" => Self::PartlyCloudy,
            "cloudy" => Self::Cloudy,
            "overcast" => Self::Overcast,
            "drizzle" => Self::Drizzle,
            "light-rain" => Self::LightRain,
            "rain" => Self::Rain,
            "moderate-rain" => Self::ModerateRain,
            "heavy-rain" => Self::HeavyRain,
            "continuous-heavy-rain" => Self::ContinuousHeavyRain,
            "showers" => Self::Showers,
            "wet-snow" => Self::WetSnow,
            "light-snow" => Self::LightSnow,
            "snow" => Self::Snow,
            "snow-showers" => Self::SnowShowers,
            "hail" => Self::Hail,
            "thunderstorm" => Self::Thunderstorm,
            "thunderstorm-with-rain" => Self::ThunderstormWithRain,
            "thunderstorm-with-hail" => Self::ThunderstormWithHail,
            _ => Self::Unknown,
        }
    }

    /// Provider code for this condition.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::PartlyCloudy => "partly-cloudy",
            Self::Cloudy => "cloudy",
            Self::Overcast => "overcast",
            Self::Drizzle => "drizzle",
            Self::LightRain => "light-rain",
            Self::Rain => "rain",
            Self::ModerateRain => "moderate-rain",
            Self::HeavyRain => "heavy-rain",
            Self::ContinuousHeavyRain => "continuous-heavy-rain",
            Self::Showers => "showers",
            Self::WetSnow => "wet-snow",
            Self::LightSnow => "light-snow",
            Self::Snow => "snow",
            Self::SnowShowers => "snow-showers",
            Self::Hail => "hail",
            Self::Thunderstorm => "thunderstorm",
            Self::ThunderstormWithRain => "thunderstorm-with-rain",
            Self::ThunderstormWithHail => "thunderstorm-with-hail",
            Self::Unknown => "unknown",
        }
    }

    /// Human-readable (Russian) description shown next to the temperature.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Clear => "Ясно",
            Self::PartlyCloudy => "малооблачно",
            Self::Cloudy => "облачно с прояснениями",
            Self::Overcast => "пасмурно",
            Self::Drizzle => "морось",
            Self::LightRain => "небольшой дождь",
            Self::Rain => "дождь",
            Self::ModerateRain => "умеренно сильный дождь",
            Self::HeavyRain => "сильный дождь",
            Self::ContinuousHeavyRain => "длительный сильный дождь",
            Self::Showers => "ливень",
            Self::WetSnow => "дождь со снегом",
            Self::LightSnow => "небольшой снег",
            Self::Snow => "снег",
            Self::SnowShowers => "снегопад",
            Self::Hail => "град",
            Self::Thunderstorm => "гроза",
            Self::ThunderstormWithRain => "дождь с грозой",
            Self::ThunderstormWithHail => "гроза с градом",
            Self::Unknown => "Загрузка...",
        }
    }
}

impl std::fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ConditionKind {
    fn from(value: String) -> Self {
        Self::from_provider(&value)
    }
}

impl From<ConditionKind> for String {
    fn from(value: ConditionKind) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourReading {
    /// Two-digit hour of day, "00".."23".
    #[serde(default)]
    pub hour: String,
    #[serde(default)]
    pub temp: i32,
}

impl HourReading {
    pub fn label(&self) -> String {
        format!("{}:00", self.hour)
    }

    pub fn hour_of_day(&self) -> Option<u32> {
        self.hour.trim().parse().ok().filter(|h| *h < 24)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DayForecast {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub hours: Vec<HourReading>,
}

impl DayForecast {
    /// Position of the reading for `hour` (0..=23), if the provider sent one.
    pub fn position_of_hour(&self, hour: u32) -> Option<usize> {
        self.hours.iter().position(|h| h.hour_of_day() == Some(hour))
    }

    pub fn reading_at(&self, hour: u32) -> Option<&HourReading> {
        self.position_of_hour(hour).map(|i| &self.hours[i])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Day {
    Today,
    Tomorrow,
}

impl Day {
    fn index(self) -> usize {
        match self {
            Day::Today => 0,
            Day::Tomorrow => 1,
        }
    }
}

/// Current conditions and the two-day hourly forecast for one city.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherSnapshot {
    /// Lower-cased city name; the storage key.
    pub name: String,
    /// Degrees Celsius.
    pub temperature: f64,
    /// Provider icon identifier.
    pub condition_code: String,
    pub condition: ConditionKind,
    /// Provider page for this location (`info.url`).
    pub url: String,
    /// Millimetres of mercury.
    pub pressure: i32,
    /// Metres per second.
    pub wind_speed: f64,
    /// Index 0 is today, index 1 is tomorrow.
    pub forecasts: Vec<DayForecast>,
}

impl WeatherSnapshot {
    /// Zeroed snapshot stored for a city until its first successful fetch.
    pub fn placeholder(name: &str) -> Self {
        Self::default().with_name(name)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = normalize_city(name);
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.condition == ConditionKind::Unknown
            && self.condition_code.is_empty()
            && self.forecasts.is_empty()
    }

    pub fn temperature_label(&self) -> String {
        format!("{:.0}", self.temperature)
    }

    pub fn icon_url(&self) -> Option<String> {
        if self.condition_code.is_empty() {
            return None;
        }
        Some(format!("{ICON_BASE_URL}/{}.svg", self.condition_code))
    }

    pub fn forecast(&self, day: Day) -> Option<&DayForecast> {
        self.forecasts.get(day.index())
    }
}

/// Geocoding result persisted per city. Resolved once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityCoordinate {
    pub city: String,
    pub lon: f64,
    pub lat: f64,
}

impl CityCoordinate {
    pub fn new(city: &str, at: Coordinate) -> Self {
        Self {
            city: normalize_city(city),
            lon: at.longitude,
            lat: at.latitude,
        }
    }

    pub fn matches(&self, city: &str) -> bool {
        same_city(&self.city, city)
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_codes_roundtrip() {
        for kind in ConditionKind::all() {
            if *kind == ConditionKind::Unknown {
                continue;
            }
            assert_eq!(ConditionKind::from_provider(kind.as_str()), *kind);
        }
    }

    #[test]
    fn unknown_condition_falls_back() {
        assert_eq!(ConditionKind::from_provider("fog"), ConditionKind::Unknown);
        assert_eq!(ConditionKind::from_provider(""), ConditionKind::Unknown);
        assert_eq!(ConditionKind::Unknown.description(), "Загрузка...");
    }

    #[test]
    fn condition_deserializes_unknown_code_without_error() {
        let kind: ConditionKind = serde_json::from_str("\"volcanic-ash\"").unwrap();
        assert_eq!(kind, ConditionKind::Unknown);

        let kind: ConditionKind = serde_json::from_str("\"snow-showers\"").unwrap();
        assert_eq!(kind, ConditionKind::SnowShowers);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"snow-showers\"");
    }

    #[test]
    fn placeholder_is_zeroed_and_lowercased() {
        let w = WeatherSnapshot::placeholder("  Москва ");
        assert_eq!(w.name, "москва");
        assert_eq!(w.temperature, 0.0);
        assert_eq!(w.pressure, 0);
        assert_eq!(w.wind_speed, 0.0);
        assert_eq!(w.condition, ConditionKind::Unknown);
        assert!(w.is_placeholder());
        assert!(w.icon_url().is_none());
    }

    #[test]
    fn temperature_label_rounds() {
        let w = WeatherSnapshot {
            temperature: -3.6,
            ..WeatherSnapshot::default()
        };
        assert_eq!(w.temperature_label(), "-4");
    }

    #[test]
    fn coordinate_matches_case_insensitively() {
        let c = CityCoordinate::new("Москва", Coordinate::new(55.75, 37.62));
        assert_eq!(c.city, "москва");
        assert!(c.matches("МОСКВА"));
        assert!(c.matches(" москва"));
        assert!(!c.matches("Томск"));
        assert_eq!(c.coordinate(), Coordinate::new(55.75, 37.62));
    }

    #[test]
    fn day_forecast_finds_hour() {
        let day = DayForecast {
            date: Some("2021-02-10".into()),
            hours: vec![
                HourReading { hour: "00".into(), temp: -4 },
                HourReading { hour: "01".into(), temp: -5 },
            ],
        };
        assert_eq!(day.position_of_hour(1), Some(1));
        assert_eq!(day.reading_at(0).map(|h| h.label()), Some("00:00".to_string()));
        assert!(day.reading_at(5).is_none());
    }

    #[test]
    fn snapshot_forecast_by_day() {
        let w = WeatherSnapshot {
            forecasts: vec![DayForecast::default()],
            ..WeatherSnapshot::default()
        };
        assert!(w.forecast(Day::Today).is_some());
        assert!(w.forecast(Day::Tomorrow).is_none());
    }
}
